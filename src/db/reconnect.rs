// Link Supervision
// Owns a live driver link and re-opens it with a bounded number of attempts

use crate::db::credentials::Credentials;
use crate::db::error::{DbalError, DriverDiagnostic};
use crate::db::options::AdapterOptions;
use crate::db::traits::LinkState;
use tracing::{debug, info, warn};

/// Opens and probes native connections for one driver
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    type Link: Send;

    /// Open a new link; failures are reported as `AccessDenied`
    async fn connect(
        &self,
        credentials: &Credentials,
        options: &AdapterOptions,
    ) -> Result<Self::Link, DbalError>;

    /// Liveness probe; false means the link is lost
    async fn probe(&self, link: &mut Self::Link) -> bool;
}

/// Live link plus the reconnection state machine around it
pub struct Supervisor<C: Connector> {
    connector: C,
    link: Option<C::Link>,
    credentials: Option<Credentials>,
    attempts: u32,
    generation: u64,
    state: LinkState,
}

impl<C: Connector> Supervisor<C> {
    pub fn new(connector: C, link: C::Link, credentials: Option<Credentials>) -> Self {
        Self {
            connector,
            link: Some(link),
            credentials,
            attempts: 0,
            generation: 0,
            state: LinkState::Connected,
        }
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// The live link, `None` after `close` or a failed reconnection
    pub fn link(&mut self) -> Option<&mut C::Link> {
        self.link.as_mut()
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Bumped every time the link is replaced
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn close(&mut self) {
        if self.link.take().is_some() {
            debug!("link closed");
        }
        self.state = LinkState::Disconnected;
    }

    /// Probe the link, marking it disconnected when the probe fails
    pub async fn is_alive(&mut self) -> bool {
        let alive = match self.link.as_mut() {
            Some(link) => self.connector.probe(link).await,
            None => false,
        };
        if !alive {
            self.state = LinkState::Disconnected;
        }
        alive
    }

    /// Replace the link with a fresh one.
    ///
    /// Fails fast when reconnection is disabled, the budget is spent or there
    /// are no credentials. Every attempt after the first waits
    /// `usleep_after_first_attempt` first. A success resets the counter.
    pub async fn reconnect(&mut self, options: &AdapterOptions) -> Result<(), DbalError> {
        loop {
            let max = options.max_reconnect_attempts;
            if max == 0 {
                self.state = LinkState::Disconnected;
                return Err(DbalError::MaxReconnect("Connection lost.".to_string()));
            }
            if self.attempts >= max {
                self.state = LinkState::Disconnected;
                return Err(DbalError::MaxReconnect(
                    "Max attempts to connect to database has been reached.".to_string(),
                ));
            }
            let Some(credentials) = self.credentials.as_ref() else {
                self.state = LinkState::Disconnected;
                return Err(DbalError::AccessDenied(DriverDiagnostic::new(
                    "Unable to reconnect: credentials not provided.",
                )));
            };

            if self.attempts > 0 {
                tokio::time::sleep(options.reconnect_delay()).await;
            }

            self.state = LinkState::Reconnecting;
            self.link = None;
            info!(attempt = self.attempts + 1, max, "reconnecting to database");

            match self.connector.connect(credentials, options).await {
                Ok(mut link) => {
                    if self.connector.probe(&mut link).await {
                        self.link = Some(link);
                        self.attempts = 0;
                        self.generation += 1;
                        self.state = LinkState::Connected;
                        info!("reconnected to database");
                        return Ok(());
                    }
                    self.attempts += 1;
                    warn!(attempt = self.attempts, "new link failed its liveness probe");
                }
                Err(e) => {
                    self.attempts += 1;
                    warn!(attempt = self.attempts, error = %e, "reconnection attempt failed");
                }
            }
            self.state = LinkState::Disconnected;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    /// Connector whose connect results are scripted; a link is just an "alive" flag
    struct MockConnector {
        outcomes: Mutex<VecDeque<bool>>,
        calls: Arc<AtomicU32>,
    }

    impl MockConnector {
        fn new(outcomes: &[bool]) -> (Self, Arc<AtomicU32>) {
            let calls = Arc::new(AtomicU32::new(0));
            let connector = Self {
                outcomes: Mutex::new(outcomes.iter().copied().collect()),
                calls: Arc::clone(&calls),
            };
            (connector, calls)
        }
    }

    #[async_trait::async_trait]
    impl Connector for MockConnector {
        type Link = bool;

        async fn connect(
            &self,
            _credentials: &Credentials,
            _options: &AdapterOptions,
        ) -> Result<bool, DbalError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let succeed = self.outcomes.lock().unwrap().pop_front().unwrap_or(false);
            if succeed {
                Ok(true)
            } else {
                Err(DbalError::AccessDenied(DriverDiagnostic::new("refused")))
            }
        }

        async fn probe(&self, link: &mut bool) -> bool {
            *link
        }
    }

    fn options(max: u32) -> AdapterOptions {
        AdapterOptions::default()
            .with_max_reconnect_attempts(max)
            .with_reconnect_delay(std::time::Duration::ZERO)
    }

    fn supervisor(outcomes: &[bool]) -> (Supervisor<MockConnector>, Arc<AtomicU32>) {
        let (connector, calls) = MockConnector::new(outcomes);
        let credentials = Credentials::new("db.local", "app");
        (Supervisor::new(connector, false, Some(credentials)), calls)
    }

    #[tokio::test]
    async fn test_disabled_reconnection() {
        let (mut supervisor, calls) = supervisor(&[true]);
        let err = supervisor.reconnect(&options(0)).await.unwrap_err();

        assert!(matches!(err, DbalError::MaxReconnect(ref msg) if msg == "Connection lost."));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_budget_is_exhausted() {
        let (mut supervisor, calls) = supervisor(&[]);
        let err = supervisor.reconnect(&options(2)).await.unwrap_err();

        assert!(matches!(
            err,
            DbalError::MaxReconnect(ref msg) if msg == "Max attempts to connect to database has been reached."
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(supervisor.attempts(), 2);
        assert_eq!(supervisor.state(), LinkState::Disconnected);

        // spent budget fails fast
        assert!(supervisor.reconnect(&options(2)).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_success_resets_counter() {
        let (mut supervisor, calls) = supervisor(&[false, true]);
        supervisor.reconnect(&options(3)).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(supervisor.attempts(), 0);
        assert_eq!(supervisor.generation(), 1);
        assert_eq!(supervisor.state(), LinkState::Connected);
        assert!(supervisor.is_alive().await);
    }

    #[tokio::test]
    async fn test_missing_credentials() {
        let (connector, calls) = MockConnector::new(&[true]);
        let mut supervisor = Supervisor::new(connector, false, None);
        let err = supervisor.reconnect(&options(3)).await.unwrap_err();

        assert!(matches!(err, DbalError::AccessDenied(ref diag)
            if diag.message == "Unable to reconnect: credentials not provided."));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_close_drops_link() {
        let (connector, _) = MockConnector::new(&[]);
        let mut supervisor = Supervisor::new(connector, true, None);
        assert!(supervisor.is_alive().await);

        supervisor.close();
        assert!(supervisor.link().is_none());
        assert!(!supervisor.is_alive().await);
        assert_eq!(supervisor.state(), LinkState::Disconnected);
    }
}
