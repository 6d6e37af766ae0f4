use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, bounded};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::debug;

use crate::config::GbifConfig;
use crate::error::KiraError;

pub trait Transport: Send + 'static {
    fn get(&mut self, url: &str) -> Result<String, KiraError>;
}

#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(config: &GbifConfig) -> Result<Self, KiraError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("kira-tax/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| KiraError::GbifHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout())
            .build()
            .map_err(|err| KiraError::GbifHttp(err.to_string()))?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn get(&mut self, url: &str) -> Result<String, KiraError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| KiraError::GbifHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "GBIF request failed".to_string());
            return Err(KiraError::GbifStatus { status, message });
        }
        response
            .text()
            .map_err(|err| KiraError::GbifHttp(err.to_string()))
    }
}

struct Job {
    url: String,
    reply: Sender<Result<String, KiraError>>,
}

pub struct Pipeline {
    jobs: Sender<Job>,
}

impl Pipeline {
    /// `buffer` is the number of queued jobs accepted before `submit`
    /// blocks.
    pub fn spawn<T: Transport>(
        transport: T,
        wait: Duration,
        buffer: usize,
    ) -> Result<Self, KiraError> {
        let (jobs, queue) = bounded(buffer.max(1));
        thread::Builder::new()
            .name("gbif-pipeline".to_string())
            .spawn(move || run_worker(transport, queue, wait))
            .map_err(|err| KiraError::GbifHttp(format!("unable to start pipeline: {err}")))?;
        Ok(Self { jobs })
    }

    /// `None` means no response came back (the worker is gone).
    pub fn submit(&self, url: &str) -> Option<Result<String, KiraError>> {
        let (reply, answer) = bounded(1);
        let job = Job {
            url: url.to_string(),
            reply,
        };
        self.jobs.send(job).ok()?;
        answer.recv().ok()
    }
}

fn run_worker<T: Transport>(mut transport: T, queue: Receiver<Job>, wait: Duration) {
    for job in queue.iter() {
        debug!(url = %job.url, "gbif.request");
        let result = transport.get(&job.url);
        // The caller may have gone away; nothing to do then.
        let _ = job.reply.send(result);
        thread::sleep(wait);
    }
}
