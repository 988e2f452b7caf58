#![allow(dead_code)]

use std::io;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use fleet_api::k8s::{ClientBundle, ClientFactory, ClientFactoryError, ProbeError, ServerVersion};

/// A bundle whose client fails every request without touching the network.
pub fn offline_bundle() -> ClientBundle {
    let service = tower::service_fn(|_request: http::Request<kube::client::Body>| async {
        Err::<http::Response<kube::client::Body>, _>(io::Error::new(
            io::ErrorKind::ConnectionRefused,
            "offline test client",
        ))
    });
    let client = kube::Client::new(service, "default");
    let config = kube::Config::new(http::Uri::from_static("https://127.0.0.1:6443"));

    ClientBundle::new(config, client)
}

pub fn server_version() -> ServerVersion {
    ServerVersion {
        major: "1".to_string(),
        minor: "30".to_string(),
        git_version: "v1.30.2".to_string(),
        platform: "linux/amd64".to_string(),
    }
}

/// [`ClientFactory`] that never talks to a cluster and records how it was used.
pub struct MockClientFactory {
    builds: AtomicUsize,
    probes: AtomicUsize,
    kubeconfigs: Mutex<Vec<Vec<u8>>>,
    build_delay: Mutex<Duration>,
    build_failure: Mutex<Option<ClientFactoryError>>,
    probe_failure: Mutex<Option<ProbeError>>,
}

impl MockClientFactory {
    pub fn new() -> Self {
        Self {
            builds: AtomicUsize::new(0),
            probes: AtomicUsize::new(0),
            kubeconfigs: Mutex::new(Vec::new()),
            build_delay: Mutex::new(Duration::ZERO),
            build_failure: Mutex::new(None),
            probe_failure: Mutex::new(None),
        }
    }

    /// Makes every build sleep, widening the window in which callers pile up.
    pub fn set_build_delay(&self, delay: Duration) {
        *self.build_delay.lock().unwrap() = delay;
    }

    pub fn fail_builds_with(&self, failure: Option<ClientFactoryError>) {
        *self.build_failure.lock().unwrap() = failure;
    }

    pub fn fail_probes_with(&self, failure: Option<ProbeError>) {
        *self.probe_failure.lock().unwrap() = failure;
    }

    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    /// Kubeconfigs passed to `build`, oldest first.
    pub fn built_kubeconfigs(&self) -> Vec<Vec<u8>> {
        self.kubeconfigs.lock().unwrap().clone()
    }

    pub fn last_built_kubeconfig(&self) -> Option<Vec<u8>> {
        self.kubeconfigs.lock().unwrap().last().cloned()
    }
}

impl Default for MockClientFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClientFactory for MockClientFactory {
    async fn build(&self, kubeconfig: &[u8]) -> Result<ClientBundle, ClientFactoryError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        self.kubeconfigs.lock().unwrap().push(kubeconfig.to_vec());

        let delay = *self.build_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let failure = self.build_failure.lock().unwrap().clone();
        match failure {
            Some(err) => Err(err),
            None => Ok(offline_bundle()),
        }
    }

    async fn probe(&self, _bundle: &ClientBundle) -> Result<ServerVersion, ProbeError> {
        self.probes.fetch_add(1, Ordering::SeqCst);

        let failure = self.probe_failure.lock().unwrap().clone();
        match failure {
            Some(err) => Err(err),
            None => Ok(server_version()),
        }
    }
}
