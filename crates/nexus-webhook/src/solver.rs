//! The nexus DNS-01 solver
//!
//! Pending challenge records are tracked per challenge (FQDN, zone, key) so a
//! single solver can have any number of challenges in flight. Ids live in
//! memory only: after a restart, clean up of an earlier challenge fails and
//! its record is left for nexus to expire.

use std::sync::Arc;

use acme_webhook::{BoxError, ChallengeRequest, Solver};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use kube::Client;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::load_config;
use crate::error::{Error, Result};
use crate::names::{extract_domain_name, extract_record_name};
use crate::nexus::{ChallengeRecords, ClientFactory, Credentials, NexusClientFactory};
use crate::secret::{resolve_api_key, KubeSecretReader, SecretReader};

/// Name cert-manager Issuers reference in `solverName`
pub const SOLVER_NAME: &str = "nexus";

/// Identity of one challenge across its present/clean-up pair
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct ChallengeKey {
    fqdn: String,
    zone: String,
    key: String,
}

impl From<&ChallengeRequest> for ChallengeKey {
    fn from(request: &ChallengeRequest) -> Self {
        Self {
            fqdn: request.resolved_fqdn.clone(),
            zone: request.resolved_zone.clone(),
            key: request.key.clone(),
        }
    }
}

/// State of a challenge's record in nexus
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PendingRecord {
    /// A create request is in flight; the key is reserved
    Creating,
    /// Record exists under this id
    Presented(Uuid),
}

/// Solver publishing challenge records through nexus
pub struct NexusSolver {
    secrets: Option<Arc<dyn SecretReader>>,
    clients: Arc<dyn ClientFactory>,
    pending: DashMap<ChallengeKey, PendingRecord>,
}

impl Default for NexusSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl NexusSolver {
    /// Create an uninitialized solver using real nexus clients
    pub fn new() -> Self {
        Self {
            secrets: None,
            clients: Arc::new(NexusClientFactory),
            pending: DashMap::new(),
        }
    }

    /// Create a ready solver from explicit components
    pub fn with_components(secrets: Arc<dyn SecretReader>, clients: Arc<dyn ClientFactory>) -> Self {
        Self {
            secrets: Some(secrets),
            clients,
            pending: DashMap::new(),
        }
    }

    /// Number of challenges presented and not yet cleaned up
    pub fn pending_challenges(&self) -> usize {
        self.pending
            .iter()
            .filter(|entry| matches!(entry.value(), PendingRecord::Presented(_)))
            .count()
    }

    /// Publish the challenge record for `request`
    ///
    /// Presenting a challenge that is already pending is a no-op, so
    /// cert-manager retries do not create duplicate records. The challenge is
    /// reserved before nexus is called: a present racing an in-flight create
    /// for the same challenge fails with [`Error::ChallengeInProgress`] and
    /// cert-manager retries it.
    pub async fn present_challenge(&self, request: &ChallengeRequest) -> Result<()> {
        let challenge = ChallengeKey::from(request);
        match self.pending.entry(challenge.clone()) {
            Entry::Occupied(entry) => {
                return match *entry.get() {
                    PendingRecord::Presented(id) => {
                        debug!(
                            fqdn = %request.resolved_fqdn,
                            challenge_id = %id,
                            "Challenge record already presented"
                        );
                        Ok(())
                    }
                    PendingRecord::Creating => Err(Error::ChallengeInProgress {
                        fqdn: request.resolved_fqdn.clone(),
                    }),
                };
            }
            Entry::Vacant(entry) => {
                entry.insert(PendingRecord::Creating);
            }
        }

        match self.create_record(request).await {
            Ok(id) => {
                self.pending.insert(challenge, PendingRecord::Presented(id));
                info!(fqdn = %request.resolved_fqdn, challenge_id = %id, "Challenge record presented");
                Ok(())
            }
            Err(e) => {
                // Release the reservation so a retry can create the record
                self.pending.remove(&challenge);
                warn!(
                    fqdn = %request.resolved_fqdn,
                    retryable = e.is_retryable(),
                    error = %e,
                    "Failed to present challenge record"
                );
                Err(e)
            }
        }
    }

    /// Remove the challenge record previously presented for `request`
    pub async fn clean_up_challenge(&self, request: &ChallengeRequest) -> Result<()> {
        let challenge = ChallengeKey::from(request);
        let id = match self.pending.get(&challenge).map(|entry| *entry) {
            Some(PendingRecord::Presented(id)) => id,
            Some(PendingRecord::Creating) => {
                return Err(Error::ChallengeInProgress {
                    fqdn: request.resolved_fqdn.clone(),
                })
            }
            None => {
                return Err(Error::UnknownChallenge {
                    fqdn: request.resolved_fqdn.clone(),
                })
            }
        };

        if let Err(e) = self.delete_record(request, id).await {
            warn!(
                fqdn = %request.resolved_fqdn,
                challenge_id = %id,
                retryable = e.is_retryable(),
                error = %e,
                "Failed to clean up challenge record"
            );
            return Err(e);
        }

        self.pending
            .remove_if(&challenge, |_, record| *record == PendingRecord::Presented(id));
        Ok(())
    }

    async fn create_record(&self, request: &ChallengeRequest) -> Result<Uuid> {
        let record_name = extract_record_name(&request.resolved_fqdn, &request.resolved_zone);
        let client = self.api_client(request).await?;

        info!(
            fqdn = %request.resolved_fqdn,
            record = %record_name,
            "Presenting challenge record"
        );

        Ok(client
            .create_challenge_record(&record_name, &request.key)
            .await?)
    }

    async fn delete_record(&self, request: &ChallengeRequest, id: Uuid) -> Result<()> {
        let domain = extract_domain_name(&request.resolved_zone);
        let client = self.api_client(request).await?;

        info!(
            fqdn = %request.resolved_fqdn,
            domain = %domain,
            challenge_id = %id,
            "Cleaning up challenge record"
        );

        Ok(client.delete_challenge_record(id).await?)
    }

    /// Resolve config and credentials for `request` and build a client
    async fn api_client(&self, request: &ChallengeRequest) -> Result<Box<dyn ChallengeRecords>> {
        let secrets = self.secrets.as_ref().ok_or(Error::NotInitialized)?;

        let domain = extract_domain_name(&request.resolved_zone);
        let config = load_config(request.config.as_ref())?;
        config.validate(request.allow_ambient_credentials)?;

        let key = resolve_api_key(
            secrets.as_ref(),
            &config.api_key_secret_ref,
            &request.resource_namespace,
        )
        .await?;

        self.clients.connect(Credentials {
            domain,
            service: config.service,
            key,
            server: config.server,
        })
    }
}

#[async_trait]
impl Solver for NexusSolver {
    fn name(&self) -> &str {
        SOLVER_NAME
    }

    async fn initialize(&mut self, kube_config: kube::Config) -> std::result::Result<(), BoxError> {
        let client = Client::try_from(kube_config).map_err(Error::KubeClient)?;
        self.secrets = Some(Arc::new(KubeSecretReader::new(client)));
        Ok(())
    }

    async fn present(&self, request: &ChallengeRequest) -> std::result::Result<(), BoxError> {
        Ok(self.present_challenge(request).await?)
    }

    async fn clean_up(&self, request: &ChallengeRequest) -> std::result::Result<(), BoxError> {
        Ok(self.clean_up_challenge(request).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nexus::{MockChallengeRecords, MockClientFactory};
    use crate::secret::MockSecretReader;
    use acme_webhook::ChallengeAction;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    /// In-memory nexus: records keyed by id
    #[derive(Default)]
    struct FakeNexus {
        records: Mutex<HashMap<Uuid, (String, String)>>,
        connections: Mutex<Vec<Credentials>>,
        latency: Duration,
    }

    struct FakeClient(Arc<FakeNexus>);

    #[async_trait]
    impl ChallengeRecords for FakeClient {
        async fn create_challenge_record(
            &self,
            hostname: &str,
            secret: &str,
        ) -> nexus_client::Result<Uuid> {
            if !self.0.latency.is_zero() {
                tokio::time::sleep(self.0.latency).await;
            }
            let id = Uuid::new_v4();
            self.0
                .records
                .lock()
                .unwrap()
                .insert(id, (hostname.to_string(), secret.to_string()));
            Ok(id)
        }

        async fn delete_challenge_record(&self, id: Uuid) -> nexus_client::Result<()> {
            match self.0.records.lock().unwrap().remove(&id) {
                Some(_) => Ok(()),
                None => Err(nexus_client::Error::Api {
                    status: 404,
                    body: "no such challenge".to_string(),
                }),
            }
        }
    }

    impl ClientFactory for Arc<FakeNexus> {
        fn connect(&self, credentials: Credentials) -> Result<Box<dyn ChallengeRecords>> {
            self.connections.lock().unwrap().push(credentials);
            Ok(Box::new(FakeClient(self.clone())))
        }
    }

    fn secret_reader() -> Arc<dyn SecretReader> {
        let mut reader = MockSecretReader::new();
        reader
            .expect_secret_value()
            .returning(|_, _, _| Ok(Some(b"c2VydmljZS1rZXk=".to_vec())));
        Arc::new(reader)
    }

    fn solver_with_fake() -> (NexusSolver, Arc<FakeNexus>) {
        let nexus = Arc::new(FakeNexus::default());
        let solver = NexusSolver::with_components(secret_reader(), Arc::new(nexus.clone()));
        (solver, nexus)
    }

    fn request(fqdn: &str, key: &str) -> ChallengeRequest {
        ChallengeRequest {
            uid: "uid".to_string(),
            action: ChallengeAction::Present,
            type_: "dns-01".to_string(),
            dns_name: "example.com".to_string(),
            key: key.to_string(),
            resource_namespace: "certs".to_string(),
            resolved_fqdn: fqdn.to_string(),
            resolved_zone: "example.com.".to_string(),
            allow_ambient_credentials: false,
            config: Some(serde_json::json!({
                "service": "web",
                "apikeysecret": {"name": "nexus-api-key", "key": "api-key"}
            })),
        }
    }

    #[test]
    fn name_is_nexus() {
        assert_eq!(NexusSolver::new().name(), "nexus");
    }

    #[tokio::test]
    async fn present_creates_record_under_zone_relative_name() {
        let (solver, nexus) = solver_with_fake();

        solver
            .present_challenge(&request("_acme-challenge.www.example.com.", "token"))
            .await
            .unwrap();

        let records = nexus.records.lock().unwrap();
        let (hostname, secret) = records.values().next().unwrap();
        assert_eq!(hostname, "_acme-challenge.www");
        assert_eq!(secret, "token");
        assert_eq!(solver.pending_challenges(), 1);
    }

    #[tokio::test]
    async fn client_is_built_from_resolved_credentials() {
        let (solver, nexus) = solver_with_fake();

        solver
            .present_challenge(&request("_acme-challenge.example.com.", "token"))
            .await
            .unwrap();

        let connections = nexus.connections.lock().unwrap();
        assert_eq!(connections[0].domain, "example.com");
        assert_eq!(connections[0].service, "web");
        assert_eq!(connections[0].key, b"service-key");
        assert_eq!(connections[0].server, None);
    }

    #[tokio::test]
    async fn clean_up_deletes_presented_record() {
        let (solver, nexus) = solver_with_fake();
        let req = request("_acme-challenge.example.com.", "token");

        solver.present_challenge(&req).await.unwrap();
        solver.clean_up_challenge(&req).await.unwrap();

        assert!(nexus.records.lock().unwrap().is_empty());
        assert_eq!(solver.pending_challenges(), 0);
    }

    #[tokio::test]
    async fn distinct_challenges_keep_their_own_ids() {
        let (solver, nexus) = solver_with_fake();
        let apex = request("_acme-challenge.example.com.", "apex-token");
        let wildcard = request("_acme-challenge.example.com.", "wildcard-token");
        let www = request("_acme-challenge.www.example.com.", "www-token");

        solver.present_challenge(&apex).await.unwrap();
        solver.present_challenge(&wildcard).await.unwrap();
        solver.present_challenge(&www).await.unwrap();
        assert_eq!(nexus.records.lock().unwrap().len(), 3);

        solver.clean_up_challenge(&wildcard).await.unwrap();

        let records = nexus.records.lock().unwrap();
        let secrets: Vec<&str> = records.values().map(|(_, s)| s.as_str()).collect();
        assert_eq!(records.len(), 2);
        assert!(secrets.contains(&"apex-token"));
        assert!(secrets.contains(&"www-token"));
        assert!(!secrets.contains(&"wildcard-token"));
    }

    #[tokio::test]
    async fn repeated_present_creates_one_record() {
        let (solver, nexus) = solver_with_fake();
        let req = request("_acme-challenge.example.com.", "token");

        solver.present_challenge(&req).await.unwrap();
        solver.present_challenge(&req).await.unwrap();

        assert_eq!(nexus.records.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn racing_presents_create_one_record() {
        let nexus = Arc::new(FakeNexus {
            latency: Duration::from_millis(50),
            ..Default::default()
        });
        let solver = NexusSolver::with_components(secret_reader(), Arc::new(nexus.clone()));
        let req = request("_acme-challenge.example.com.", "token");

        let (first, second) = tokio::join!(
            solver.present_challenge(&req),
            solver.present_challenge(&req)
        );

        first.unwrap();
        assert!(matches!(second, Err(Error::ChallengeInProgress { .. })));
        assert_eq!(nexus.records.lock().unwrap().len(), 1);

        // The retry after the first create completes is a no-op
        solver.present_challenge(&req).await.unwrap();
        solver.clean_up_challenge(&req).await.unwrap();

        assert!(nexus.records.lock().unwrap().is_empty());
        assert_eq!(solver.pending_challenges(), 0);
    }

    #[tokio::test]
    async fn racing_distinct_challenges_all_present() {
        let nexus = Arc::new(FakeNexus {
            latency: Duration::from_millis(20),
            ..Default::default()
        });
        let solver = NexusSolver::with_components(secret_reader(), Arc::new(nexus.clone()));
        let apex = request("_acme-challenge.example.com.", "apex-token");
        let wildcard = request("_acme-challenge.example.com.", "wildcard-token");

        let (apex_result, wildcard_result) = tokio::join!(
            solver.present_challenge(&apex),
            solver.present_challenge(&wildcard)
        );

        apex_result.unwrap();
        wildcard_result.unwrap();
        assert_eq!(nexus.records.lock().unwrap().len(), 2);
        assert_eq!(solver.pending_challenges(), 2);
    }

    #[tokio::test]
    async fn clean_up_during_create_is_rejected() {
        let nexus = Arc::new(FakeNexus {
            latency: Duration::from_millis(50),
            ..Default::default()
        });
        let solver = NexusSolver::with_components(secret_reader(), Arc::new(nexus.clone()));
        let req = request("_acme-challenge.example.com.", "token");

        let clean_up_soon = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            solver.clean_up_challenge(&req).await
        };
        let (presented, cleaned) = tokio::join!(solver.present_challenge(&req), clean_up_soon);

        presented.unwrap();
        assert!(matches!(cleaned, Err(Error::ChallengeInProgress { .. })));
        assert_eq!(solver.pending_challenges(), 1);
    }

    #[tokio::test]
    async fn failed_create_releases_challenge() {
        let mut records = MockChallengeRecords::new();
        records
            .expect_create_challenge_record()
            .times(1)
            .returning(|_, _| {
                Err(nexus_client::Error::Api {
                    status: 503,
                    body: "unavailable".to_string(),
                })
            });
        let mut records = Some(records);

        let nexus = Arc::new(FakeNexus::default());
        let fallback = nexus.clone();
        let mut factory = MockClientFactory::new();
        factory.expect_connect().times(2).returning(move |credentials| {
            match records.take() {
                Some(failing) => Ok(Box::new(failing) as Box<dyn ChallengeRecords>),
                None => fallback.connect(credentials),
            }
        });

        let solver = NexusSolver::with_components(secret_reader(), Arc::new(factory));
        let req = request("_acme-challenge.example.com.", "token");

        let err = solver.present_challenge(&req).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(solver.pending_challenges(), 0);

        solver.present_challenge(&req).await.unwrap();
        assert_eq!(nexus.records.lock().unwrap().len(), 1);
        assert_eq!(solver.pending_challenges(), 1);
    }

    #[tokio::test]
    async fn clean_up_without_present_fails() {
        let (solver, nexus) = solver_with_fake();

        let err = solver
            .clean_up_challenge(&request("_acme-challenge.example.com.", "token"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::UnknownChallenge { .. }));
        assert!(nexus.connections.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_delete_keeps_challenge_pending() {
        let mut records = MockChallengeRecords::new();
        records
            .expect_create_challenge_record()
            .returning(|_, _| Ok(Uuid::new_v4()));
        records.expect_delete_challenge_record().returning(|_| {
            Err(nexus_client::Error::Api {
                status: 502,
                body: "bad gateway".to_string(),
            })
        });
        let records = Arc::new(records);

        struct Shared(Arc<MockChallengeRecords>);

        #[async_trait]
        impl ChallengeRecords for Shared {
            async fn create_challenge_record(
                &self,
                hostname: &str,
                secret: &str,
            ) -> nexus_client::Result<Uuid> {
                self.0.create_challenge_record(hostname, secret).await
            }

            async fn delete_challenge_record(&self, id: Uuid) -> nexus_client::Result<()> {
                self.0.delete_challenge_record(id).await
            }
        }

        let mut factory = MockClientFactory::new();
        factory
            .expect_connect()
            .times(2)
            .returning(move |_| {
                Ok(Box::new(Shared(records.clone())) as Box<dyn ChallengeRecords>)
            });

        let solver = NexusSolver::with_components(secret_reader(), Arc::new(factory));
        let req = request("_acme-challenge.example.com.", "token");

        solver.present_challenge(&req).await.unwrap();
        let err = solver.clean_up_challenge(&req).await.unwrap_err();

        assert!(matches!(err, Error::Nexus(_)));
        assert_eq!(solver.pending_challenges(), 1);
    }

    #[tokio::test]
    async fn empty_secret_name_fails_before_connecting() {
        let mut reader = MockSecretReader::new();
        reader.expect_secret_value().never();
        let mut factory = MockClientFactory::new();
        factory.expect_connect().never();

        let solver = NexusSolver::with_components(Arc::new(reader), Arc::new(factory));
        let mut req = request("_acme-challenge.example.com.", "token");
        req.allow_ambient_credentials = true;
        req.config = Some(serde_json::json!({"service": "web"}));

        let err = solver.present_challenge(&req).await.unwrap_err();
        assert!(matches!(err, Error::MissingSecretName));
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let (solver, _) = solver_with_fake();
        let mut req = request("_acme-challenge.example.com.", "token");
        req.config = Some(serde_json::json!({"apikeysecret": {"name": "s", "key": "k"}}));

        let err = solver.present_challenge(&req).await.unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn undecodable_secret_fails_present() {
        let mut reader = MockSecretReader::new();
        reader
            .expect_secret_value()
            .returning(|_, _, _| Ok(Some(b"%%%".to_vec())));
        let nexus = Arc::new(FakeNexus::default());
        let solver = NexusSolver::with_components(Arc::new(reader), Arc::new(nexus.clone()));

        let err = solver
            .present_challenge(&request("_acme-challenge.example.com.", "token"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::KeyDecode(_)));
        assert!(nexus.records.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn uninitialized_solver_fails() {
        let solver = NexusSolver::new();
        let err = solver
            .present_challenge(&request("_acme-challenge.example.com.", "token"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotInitialized));
    }

    #[tokio::test]
    async fn solver_trait_reports_errors_as_messages() {
        let solver = NexusSolver::new();
        let err = Solver::present(&solver, &request("_acme-challenge.example.com.", "token"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "solver not initialized");
    }
}
