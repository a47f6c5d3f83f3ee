use std::io::Read;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use image::ImageFormat;
use percent_encoding::percent_decode_str;
use reqwest::blocking::Client;
use reqwest::header::USER_AGENT;
use tracing::{debug, warn};
use url::Url;

#[derive(Debug, Clone)]
pub struct Config {
    pub workers: usize,
    pub timeout: Duration,
    pub max_image_bytes: u64,
    pub user_agent: String,
    pub http_client: Option<Client>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: 2,
            timeout: Duration::from_secs(30),
            max_image_bytes: 20 * 1024 * 1024,
            user_agent: format!("pinfeed/{}", crate::VERSION),
            http_client: None,
        }
    }
}

/// One image instance to load. `generation` and `index` tie it to the card
/// of the feed session that asked for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub generation: u64,
    pub index: usize,
    pub post_id: i64,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug)]
pub struct ImageLoaded {
    pub generation: u64,
    pub index: usize,
    pub post_id: i64,
    pub result: Result<Dimensions>,
}

struct Job {
    request: Request,
    tx: Sender<ImageLoaded>,
}

/// Cheap handle for queueing loads onto a running [`Manager`].
#[derive(Clone)]
pub struct Handle {
    jobs: Sender<Job>,
}

impl Handle {
    /// Queues `request`; exactly one [`ImageLoaded`] is sent on `tx` when it
    /// finishes, unless the manager shuts down first.
    pub fn enqueue(&self, request: Request, tx: Sender<ImageLoaded>) {
        let _ = self.jobs.send(Job { request, tx });
    }
}

struct Worker {
    client: Client,
    user_agent: String,
    max_image_bytes: u64,
}

pub struct Manager {
    jobs: Sender<Job>,
    stop: Sender<()>,
    handles: Vec<thread::JoinHandle<()>>,
}

impl Manager {
    pub fn new(cfg: Config) -> Result<Self> {
        let mut cfg = cfg;
        if cfg.workers == 0 {
            cfg.workers = 2;
        }

        let client = if let Some(client) = cfg.http_client.clone() {
            client
        } else {
            Client::builder()
                .timeout(cfg.timeout)
                .build()
                .context("media: build http client")?
        };

        let (job_tx, job_rx) = unbounded::<Job>();
        let (stop_tx, stop_rx) = unbounded();

        let mut handles = Vec::new();
        for _ in 0..cfg.workers {
            let rx_jobs = job_rx.clone();
            let rx_stop = stop_rx.clone();
            let worker = Worker {
                client: client.clone(),
                user_agent: cfg.user_agent.clone(),
                max_image_bytes: cfg.max_image_bytes,
            };
            handles.push(thread::spawn(move || worker.run(rx_jobs, rx_stop)));
        }

        Ok(Self {
            jobs: job_tx,
            stop: stop_tx,
            handles,
        })
    }

    pub fn handle(&self) -> Handle {
        Handle {
            jobs: self.jobs.clone(),
        }
    }

    fn shutdown(&mut self) {
        for _ in &self.handles {
            let _ = self.stop.send(());
        }
        while let Some(handle) = self.handles.pop() {
            let _ = handle.join();
        }
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Worker {
    fn run(&self, jobs: Receiver<Job>, stop: Receiver<()>) {
        loop {
            crossbeam_channel::select! {
                recv(stop) -> _ => break,
                recv(jobs) -> msg => {
                    match msg {
                        Ok(job) => self.process(job),
                        Err(_) => break,
                    }
                }
            }
        }
    }

    fn process(&self, job: Job) {
        let Request {
            generation,
            index,
            post_id,
            url,
        } = job.request;
        let result = self.load(&url);
        match &result {
            Ok(dims) => debug!(post_id, width = dims.width, height = dims.height, "image decoded"),
            Err(err) => warn!(post_id, url = %url, error = %format!("{err:#}"), "image failed to load"),
        }
        let _ = job.tx.send(ImageLoaded {
            generation,
            index,
            post_id,
            result,
        });
    }

    fn load(&self, url: &str) -> Result<Dimensions> {
        if url.trim().is_empty() {
            bail!("media: url required");
        }
        let bytes = self.download(url)?;
        decode_dimensions(&bytes)
    }

    fn download(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .header(USER_AGENT, &self.user_agent)
            .send()
            .context("media: download")?;

        if !response.status().is_success() {
            return Err(anyhow!("media: request failed: {}", response.status()));
        }

        let mut bytes = Vec::with_capacity(128 * 1024);
        response
            .take(self.max_image_bytes.saturating_add(1))
            .read_to_end(&mut bytes)
            .context("media: body")?;
        if bytes.len() as u64 > self.max_image_bytes {
            bail!("media: image larger than {} bytes", self.max_image_bytes);
        }
        Ok(bytes)
    }
}

/// Fully decodes `bytes` and reports the natural pixel size.
pub fn decode_dimensions(bytes: &[u8]) -> Result<Dimensions> {
    if bytes.is_empty() {
        bail!("media: image had no bytes");
    }
    let format = image::guess_format(bytes).context("media: unrecognized image format")?;
    let image = image::load_from_memory_with_format(bytes, format)
        .with_context(|| format!("media: decode {}", format_label(format)))?;
    Ok(Dimensions {
        width: image.width(),
        height: image.height(),
    })
}

fn format_label(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Jpeg => "image/jpeg",
        ImageFormat::Png => "image/png",
        ImageFormat::Gif => "image/gif",
        ImageFormat::WebP => "image/webp",
        _ => "image",
    }
}

/// Last path segment of an image URL, for display.
pub fn image_label(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(|mut segments| segments.next_back())
                .map(|segment| percent_decode_str(segment).decode_utf8_lossy().to_string())
        })
        .filter(|label| !label.is_empty())
        .unwrap_or_else(|| "image".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    use image::{ImageBuffer, Rgb};

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let buffer: ImageBuffer<Rgb<u8>, Vec<u8>> = ImageBuffer::new(width, height);
        let mut bytes = Vec::new();
        buffer
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn decodes_png_dimensions() {
        let dims = decode_dimensions(&png_bytes(12, 30)).unwrap();
        assert_eq!(
            dims,
            Dimensions {
                width: 12,
                height: 30
            }
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(decode_dimensions(b"").is_err());
        assert!(decode_dimensions(b"definitely not an image").is_err());
    }

    #[test]
    fn labels_from_url() {
        assert_eq!(image_label("http://minio:9000/posts/cat%20pic.png?x=1"), "cat pic.png");
        assert_eq!(image_label("not a url"), "image");
        assert_eq!(image_label("http://host/"), "image");
    }

    #[test]
    fn worker_reports_unreachable_image() {
        let manager = Manager::new(Config {
            workers: 1,
            timeout: Duration::from_secs(2),
            ..Default::default()
        })
        .unwrap();
        let (tx, rx) = unbounded();
        manager.handle().enqueue(
            Request {
                generation: 3,
                index: 0,
                post_id: 9,
                url: String::new(),
            },
            tx,
        );
        let loaded = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(loaded.generation, 3);
        assert_eq!(loaded.post_id, 9);
        assert!(loaded.result.is_err());
    }

    #[test]
    fn worker_decodes_served_image() {
        use tiny_http::{Response, Server};

        let server = Server::http("127.0.0.1:0").unwrap();
        let addr = server.server_addr().to_ip().unwrap();
        let body = png_bytes(40, 20);
        let serve = thread::spawn(move || {
            let request = server.recv().unwrap();
            let _ = request.respond(Response::from_data(body));
        });

        let manager = Manager::new(Config {
            workers: 1,
            ..Default::default()
        })
        .unwrap();
        let (tx, rx) = unbounded();
        manager.handle().enqueue(
            Request {
                generation: 1,
                index: 4,
                post_id: 2,
                url: format!("http://{addr}/img.png"),
            },
            tx,
        );
        let loaded = rx.recv_timeout(Duration::from_secs(10)).unwrap();
        serve.join().unwrap();
        assert_eq!(loaded.index, 4);
        let dims = loaded.result.unwrap();
        assert_eq!((dims.width, dims.height), (40, 20));
    }
}
