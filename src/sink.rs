use crate::config::{DocumentSinkConfig, MongoSinkConfig};
use crate::status::StatusDocument;
use async_trait::async_trait;
use mongodb::options::ClientOptions;
use mongodb::Collection;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to encode status document: {0}")]
    Encode(#[from] serde_yaml::Error),
    #[error("failed to write status document: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to send status document: {0}")]
    Http(#[from] reqwest::Error),
    #[error("mongodb: {0}")]
    Mongo(#[from] mongodb::error::Error),
    #[error("document store rejected status document with HTTP {status}")]
    Rejected { status: u16 },
}

/// Consumer of one `(device, status)` pair per probe.
#[async_trait]
pub trait StatusSink: Send + Sync {
    fn name(&self) -> &'static str;
    async fn emit(&self, doc: &StatusDocument) -> Result<(), SinkError>;
}

/// Prints every document as YAML on stdout.
#[derive(Debug, Default)]
pub struct ConsoleSink;

pub fn render_yaml(doc: &StatusDocument) -> Result<String, SinkError> {
    Ok(serde_yaml::to_string(doc)?)
}

#[async_trait]
impl StatusSink for ConsoleSink {
    fn name(&self) -> &'static str {
        "console"
    }

    async fn emit(&self, doc: &StatusDocument) -> Result<(), SinkError> {
        let text = render_yaml(doc)?;
        let mut out = tokio::io::stdout();
        out.write_all(format!("{text}\n").as_bytes()).await?;
        out.flush().await?;
        Ok(())
    }
}

/// Inserts every document into a MongoDB collection as `{device, status}`.
pub struct MongoSink {
    collection: Collection<StatusDocument>,
}

impl MongoSink {
    /// Builds the client; the driver connects lazily on the first insert.
    pub async fn connect(cfg: &MongoSinkConfig) -> Result<Self, SinkError> {
        let uri = mongo_uri(&cfg.address);
        let mut options = ClientOptions::parse(uri.as_str()).await?;
        options.app_name = Some("status-collector".to_string());
        // Bounds how long an insert waits for a reachable server.
        options.server_selection_timeout = Some(Duration::from_millis(cfg.timeout_ms));
        let client = mongodb::Client::with_options(options)?;
        let collection = client
            .database(&cfg.database)
            .collection::<StatusDocument>(&cfg.collection);
        Ok(Self { collection })
    }
}

/// `localhost` style addresses become `mongodb://localhost`; full URIs pass through.
pub fn mongo_uri(address: &str) -> String {
    let address = address.trim();
    if address.starts_with("mongodb://") || address.starts_with("mongodb+srv://") {
        address.to_string()
    } else {
        format!("mongodb://{address}")
    }
}

#[async_trait]
impl StatusSink for MongoSink {
    fn name(&self) -> &'static str {
        "mongodb"
    }

    async fn emit(&self, doc: &StatusDocument) -> Result<(), SinkError> {
        self.collection.insert_one(doc).await?;
        Ok(())
    }
}

/// Inserts every document into a document store by POSTing it as JSON.
#[derive(Debug, Clone)]
pub struct DocumentSink {
    client: Client,
    url: String,
    timeout: Duration,
}

impl DocumentSink {
    pub fn new(cfg: &DocumentSinkConfig) -> Self {
        let client = Client::builder()
            .user_agent(concat!("status-collector/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            url: cfg.url.trim().to_string(),
            timeout: Duration::from_millis(cfg.timeout_ms),
        }
    }
}

#[async_trait]
impl StatusSink for DocumentSink {
    fn name(&self) -> &'static str {
        "document"
    }

    async fn emit(&self, doc: &StatusDocument) -> Result<(), SinkError> {
        let resp = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(doc)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SinkError::Rejected {
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}
