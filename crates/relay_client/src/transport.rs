//! The seam between the sync engine and the network.

use chatrelay_api::*;
use std::sync::Arc;

/// Calls against a relay endpoint.
///
/// Every call is a single request. Failures are returned, not retried:
/// the sync engine retries on its next tick.
pub trait RelayTransport: 'static + Send + Sync + std::fmt::Debug {
    /// `GET messages`, optionally after a cursor.
    fn messages(
        &self,
        since: Option<RecordId>,
    ) -> BoxFut<'_, RelayResult<Vec<Record>>>;

    /// `POST messages`. Returns the record as the relay stored it.
    fn post_message(&self, record: NewRecord)
        -> BoxFut<'_, RelayResult<Record>>;

    /// `GET topic`.
    fn topic(&self) -> BoxFut<'_, RelayResult<Topic>>;

    /// `POST topic`.
    fn set_topic(&self, req: SetTopic) -> BoxFut<'_, RelayResult<Topic>>;

    /// `POST presence`.
    fn heartbeat(&self, beat: Heartbeat) -> BoxFut<'_, RelayResult<()>>;

    /// `POST leave`.
    fn leave(&self, leave: Leave) -> BoxFut<'_, RelayResult<()>>;

    /// `GET users`.
    fn users(&self) -> BoxFut<'_, RelayResult<Vec<String>>>;

    /// `GET presence`, the full leases.
    fn presence(&self) -> BoxFut<'_, RelayResult<Vec<PresenceEntry>>>;
}

/// Trait-object [RelayTransport].
pub type DynRelayTransport = Arc<dyn RelayTransport>;

/// [RelayTransport] over http, using blocking `ureq` calls on the
/// tokio blocking pool.
#[derive(Debug)]
pub struct HttpTransport {
    url: url::Url,
    agent: ureq::Agent,
}

impl HttpTransport {
    /// Construct a transport for `url` with a per request timeout.
    pub fn new(url: url::Url, timeout: std::time::Duration) -> Self {
        Self {
            url,
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }

    /// Construct a trait-object transport from a client config.
    pub fn create(
        config: &crate::ClientConfig,
    ) -> RelayResult<DynRelayTransport> {
        let out: DynRelayTransport = Arc::new(Self::new(
            config.parsed_url()?,
            config.request_timeout(),
        ));
        Ok(out)
    }

    fn action_url(&self, action: &str, since: Option<RecordId>) -> url::Url {
        let mut url = self.url.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("action", action);
            if let Some(since) = since {
                query.append_pair("since", &since.to_string());
            }
        }
        url
    }

    fn call<T>(
        &self,
        method: &'static str,
        url: url::Url,
        body: Option<String>,
    ) -> BoxFut<'_, RelayResult<T>>
    where
        T: serde::de::DeserializeOwned + 'static + Send,
    {
        let agent = self.agent.clone();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || {
                blocking_call(&agent, method, &url, body)
            })
            .await
            .map_err(|e| RelayError::other_src("task join error", e))?
        })
    }

    fn post<B, T>(&self, action: &str, body: &B) -> BoxFut<'_, RelayResult<T>>
    where
        B: serde::Serialize,
        T: serde::de::DeserializeOwned + 'static + Send,
    {
        match serde_json::to_string(body) {
            Ok(body) => self.call("POST", self.action_url(action, None), Some(body)),
            Err(err) => Box::pin(async move {
                Err(RelayError::other_src("encoding relay request", err))
            }),
        }
    }
}

fn blocking_call<T: serde::de::DeserializeOwned>(
    agent: &ureq::Agent,
    method: &str,
    url: &url::Url,
    body: Option<String>,
) -> RelayResult<T> {
    let req = agent.request_url(method, url);
    let res = match body {
        Some(body) => req
            .set("Content-Type", "application/json")
            .send_string(&body),
        None => req.call(),
    };

    match res {
        Ok(res) => {
            let text = res
                .into_string()
                .map_err(|e| RelayError::other_src("reading relay response", e))?;
            serde_json::from_str(&text)
                .map_err(|e| RelayError::other_src("decoding relay response", e))
        }
        Err(ureq::Error::Status(status, res)) => {
            Err(RelayError::status(status, res.into_string().unwrap_or_default()))
        }
        Err(ureq::Error::Transport(err)) => {
            Err(RelayError::other_src("contacting relay", err))
        }
    }
}

impl RelayTransport for HttpTransport {
    fn messages(
        &self,
        since: Option<RecordId>,
    ) -> BoxFut<'_, RelayResult<Vec<Record>>> {
        self.call("GET", self.action_url("messages", since), None)
    }

    fn post_message(
        &self,
        record: NewRecord,
    ) -> BoxFut<'_, RelayResult<Record>> {
        self.post("messages", &record)
    }

    fn topic(&self) -> BoxFut<'_, RelayResult<Topic>> {
        self.call("GET", self.action_url("topic", None), None)
    }

    fn set_topic(&self, req: SetTopic) -> BoxFut<'_, RelayResult<Topic>> {
        self.post("topic", &req)
    }

    fn heartbeat(&self, beat: Heartbeat) -> BoxFut<'_, RelayResult<()>> {
        let fut = self.post::<_, serde_json::Value>("presence", &beat);
        Box::pin(async move { fut.await.map(|_| ()) })
    }

    fn leave(&self, leave: Leave) -> BoxFut<'_, RelayResult<()>> {
        let fut = self.post::<_, serde_json::Value>("leave", &leave);
        Box::pin(async move { fut.await.map(|_| ()) })
    }

    fn users(&self) -> BoxFut<'_, RelayResult<Vec<String>>> {
        self.call("GET", self.action_url("users", None), None)
    }

    fn presence(&self) -> BoxFut<'_, RelayResult<Vec<PresenceEntry>>> {
        self.call("GET", self.action_url("presence", None), None)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn action_urls() {
        let t = HttpTransport::new(
            url::Url::parse("http://127.0.0.1:1/chat.php").unwrap(),
            std::time::Duration::from_secs(1),
        );
        assert_eq!(
            "http://127.0.0.1:1/chat.php?action=topic",
            t.action_url("topic", None).as_str()
        );
        let since: RecordId = "1700000000.5".parse().unwrap();
        assert_eq!(
            "http://127.0.0.1:1/chat.php?action=messages&since=1700000000.5000000000",
            t.action_url("messages", Some(since)).as_str()
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unreachable_relay_is_an_error() {
        // nothing listens on the discard port of localhost
        let t = HttpTransport::new(
            url::Url::parse("http://127.0.0.1:9/").unwrap(),
            std::time::Duration::from_secs(1),
        );
        let err = t.users().await.unwrap_err();
        assert!(!err.is_not_found());
    }
}
