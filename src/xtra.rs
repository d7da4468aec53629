//! Almanac (XTRA) downloads with server failover.
//!
//! At most one download job exists at a time. A job walks the configured
//! servers in order until one answers; the data is then injected into the
//! engine. Exhausting the list ends the job without further retries.

use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::engine::Xtra;
use crate::event::{Event, EventSender};

/// Timeout applied to a single download attempt.
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Fetches a URL in the background and posts `XtraFetched` when done.
pub trait XtraFetcher: Send {
    fn fetch(&mut self, url: &str, user_agent: Option<&str>);
}

/// HTTP fetcher on a blocking reqwest client, one worker thread per attempt.
pub struct HttpXtraFetcher {
    client: reqwest::blocking::Client,
    events: EventSender,
}

impl HttpXtraFetcher {
    pub fn new(events: EventSender) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .build()?;
        Ok(Self { client, events })
    }
}

fn download(
    client: &reqwest::blocking::Client,
    url: &str,
    user_agent: Option<&str>,
) -> Result<Vec<u8>, String> {
    let mut request = client.get(url);
    if let Some(agent) = user_agent {
        request = request.header(reqwest::header::USER_AGENT, agent);
    }
    let response = request.send().map_err(|e| e.to_string())?;
    let status = response.status();
    if !status.is_success() {
        return Err(format!("HTTP {}", status.as_u16()));
    }
    let body = response.bytes().map_err(|e| e.to_string())?;
    if body.is_empty() {
        return Err("empty response body".to_string());
    }
    Ok(body.to_vec())
}

impl XtraFetcher for HttpXtraFetcher {
    fn fetch(&mut self, url: &str, user_agent: Option<&str>) {
        let client = self.client.clone();
        let events = self.events.clone();
        let url = url.to_string();
        let user_agent = user_agent.map(str::to_string);
        let spawned = thread::Builder::new()
            .name("xtra-download".into())
            .spawn(move || {
                let result = download(&client, &url, user_agent.as_deref());
                events.post(Event::XtraFetched { url, result });
            });
        if let Err(e) = spawned {
            warn!(error = %e, "Failed to spawn XTRA download");
        }
    }
}

#[derive(Debug)]
struct DownloadJob {
    next_server: usize,
    in_flight: String,
}

/// What a finished attempt led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XtraOutcome {
    Injected,
    /// Attempt failed; the next server is being tried.
    Retrying(String),
    /// Every server failed.
    Exhausted,
    /// The result did not belong to the current job.
    Ignored,
}

pub struct XtraDownloader {
    servers: Vec<String>,
    user_agent: Option<String>,
    force_inject: bool,
    job: Option<DownloadJob>,
    fetcher: Box<dyn XtraFetcher>,
}

impl XtraDownloader {
    pub fn new(
        servers: Vec<String>,
        user_agent: Option<String>,
        force_inject: bool,
        fetcher: Box<dyn XtraFetcher>,
    ) -> Self {
        Self {
            servers,
            user_agent,
            force_inject,
            job: None,
            fetcher,
        }
    }

    pub fn in_flight(&self) -> bool {
        self.job.is_some()
    }

    pub fn force_inject(&self) -> bool {
        self.force_inject
    }

    /// Start a download job. No-op while one is running, when online
    /// assistance is disabled or when no servers are configured.
    pub fn request(&mut self, online_enabled: bool) {
        if self.job.is_some() {
            debug!("XTRA download already in flight");
            return;
        }
        if !online_enabled {
            debug!("Online assistance disabled, not downloading XTRA data");
            return;
        }
        let Some(first) = self.servers.first().cloned() else {
            debug!("No XTRA servers configured");
            return;
        };
        info!(url = first, "Downloading XTRA data");
        self.fetcher.fetch(&first, self.user_agent.as_deref());
        self.job = Some(DownloadJob {
            next_server: 1,
            in_flight: first,
        });
    }

    /// The network came online; with force-inject configured and the engine
    /// running, fetch fresh data without waiting for the engine to ask.
    pub fn on_network_online(&mut self, engine_running: bool, online_enabled: bool) {
        if self.force_inject && engine_running {
            self.request(online_enabled);
        }
    }

    /// An attempt finished. `xtra` is the engine's injection interface.
    pub fn on_fetched(
        &mut self,
        url: &str,
        result: Result<Vec<u8>, String>,
        xtra: Option<&mut dyn Xtra>,
    ) -> XtraOutcome {
        let Some(job) = self.job.as_mut() else {
            return XtraOutcome::Ignored;
        };
        if job.in_flight != url {
            debug!(url, "Ignoring result for stale XTRA download");
            return XtraOutcome::Ignored;
        }

        match result {
            Ok(data) => {
                self.job = None;
                info!(url, bytes = data.len(), "XTRA data downloaded");
                match xtra {
                    Some(xtra) => {
                        if let Err(e) = xtra.inject_xtra_data(&data) {
                            warn!(error = %e, "XTRA injection failed");
                        }
                    }
                    None => warn!("Engine has no XTRA interface, dropping data"),
                }
                XtraOutcome::Injected
            }
            Err(error) => {
                warn!(url, error, "XTRA download failed");
                match self.servers.get(job.next_server).cloned() {
                    Some(next) => {
                        job.next_server += 1;
                        job.in_flight = next.clone();
                        self.fetcher.fetch(&next, self.user_agent.as_deref());
                        XtraOutcome::Retrying(next)
                    }
                    None => {
                        self.job = None;
                        warn!("All XTRA servers failed");
                        XtraOutcome::Exhausted
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::engine::EngineCallbacks;
    use std::sync::{Arc, Mutex};

    struct RecordingFetcher(Arc<Mutex<Vec<String>>>);

    impl XtraFetcher for RecordingFetcher {
        fn fetch(&mut self, url: &str, _user_agent: Option<&str>) {
            self.0.lock().unwrap().push(url.to_string());
        }
    }

    #[derive(Default)]
    struct Sink {
        injected: Vec<Vec<u8>>,
    }

    impl Xtra for Sink {
        fn set_callback(&mut self, _callbacks: EngineCallbacks) -> Result<(), EngineError> {
            Ok(())
        }

        fn inject_xtra_data(&mut self, data: &[u8]) -> Result<(), EngineError> {
            self.injected.push(data.to_vec());
            Ok(())
        }
    }

    fn downloader(force: bool) -> (XtraDownloader, Arc<Mutex<Vec<String>>>) {
        let fetched = Arc::new(Mutex::new(Vec::new()));
        let servers = vec!["http://a/xtra".into(), "http://b/xtra".into(), "http://c/xtra".into()];
        let downloader = XtraDownloader::new(
            servers,
            Some("agent".into()),
            force,
            Box::new(RecordingFetcher(fetched.clone())),
        );
        (downloader, fetched)
    }

    #[test]
    fn test_failover_to_third_server() {
        let (mut downloader, fetched) = downloader(false);
        let mut sink = Sink::default();

        downloader.request(true);
        assert_eq!(
            downloader.on_fetched("http://a/xtra", Err("timeout".into()), Some(&mut sink)),
            XtraOutcome::Retrying("http://b/xtra".into())
        );
        downloader.on_fetched("http://b/xtra", Err("HTTP 404".into()), Some(&mut sink));
        assert_eq!(
            downloader.on_fetched("http://c/xtra", Ok(vec![1, 2, 3]), Some(&mut sink)),
            XtraOutcome::Injected
        );

        assert_eq!(fetched.lock().unwrap().len(), 3);
        assert_eq!(sink.injected, vec![vec![1, 2, 3]]);
        assert!(!downloader.in_flight());
    }

    #[test]
    fn test_single_flight() {
        let (mut downloader, fetched) = downloader(false);
        downloader.request(true);
        downloader.request(true);
        assert_eq!(fetched.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_disabled_online_assistance() {
        let (mut downloader, fetched) = downloader(false);
        downloader.request(false);
        assert!(fetched.lock().unwrap().is_empty());
        assert!(!downloader.in_flight());
    }

    #[test]
    fn test_exhausted_stops_silently() {
        let (mut downloader, fetched) = downloader(false);
        downloader.request(true);
        for url in ["http://a/xtra", "http://b/xtra"] {
            downloader.on_fetched(url, Err("down".into()), None);
        }
        assert_eq!(
            downloader.on_fetched("http://c/xtra", Err("down".into()), None),
            XtraOutcome::Exhausted
        );
        assert_eq!(fetched.lock().unwrap().len(), 3);
        assert!(!downloader.in_flight());
    }

    #[test]
    fn test_force_inject_on_network_online() {
        let (mut downloader, fetched) = downloader(true);
        downloader.on_network_online(false, true);
        assert!(fetched.lock().unwrap().is_empty());
        downloader.on_network_online(true, true);
        assert_eq!(fetched.lock().unwrap().as_slice(), ["http://a/xtra"]);

        let (mut plain, fetched) = self::downloader(false);
        plain.on_network_online(true, true);
        assert!(fetched.lock().unwrap().is_empty());
    }
}
