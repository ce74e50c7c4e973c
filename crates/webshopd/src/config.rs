//! Command-line settings for webshopd

use clap::Parser;
use mongodb::options::{ClientOptions, Credential};
use tracing::Level;
use webshop_common::Result;
use webshop_mongodb::connection::parse_options;
use webshop_mongodb::PoolConfig;

#[derive(Parser, Debug, Clone)]
#[command(name = "webshopd")]
#[command(about = "Webshop service daemon")]
#[command(version)]
pub struct Args {
    /// MongoDB connect string
    #[arg(long, default_value = "localhost")]
    pub mongo_url: String,

    /// MongoDB username
    #[arg(long, default_value = "")]
    pub mongo_user: String,

    /// MongoDB password
    #[arg(long, default_value = "", hide_default_value = true)]
    pub mongo_pass: String,

    /// Number of MongoDB servers to acknowledge for a confirmation
    #[arg(long, default_value = "1")]
    pub mongo_write_ack_min: u32,

    /// Synchronize filesystem on MongoDB servers for a confirmation
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub mongo_write_fsync: bool,

    /// Ping the MongoDB server before exiting
    #[arg(long)]
    pub ping: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    pub log_level: Level,
}

impl Args {
    pub fn settings(&self) -> MongoDbSettings {
        MongoDbSettings {
            url: self.mongo_url.clone(),
            user: self.mongo_user.clone(),
            pass: self.mongo_pass.clone(),
            write_ack_min: self.mongo_write_ack_min,
            fsync: self.mongo_write_fsync,
        }
    }
}

/// MongoDB settings needed by the application
#[derive(Clone, PartialEq, Eq)]
pub struct MongoDbSettings {
    pub url: String,
    pub user: String,
    pub pass: String,
    pub write_ack_min: u32,
    pub fsync: bool,
}

impl MongoDbSettings {
    /// Connection string for the url, accepting bare `host[:port][/db]` urls
    pub fn connection_string(&self) -> String {
        if self.url.contains("://") {
            self.url.clone()
        } else {
            format!("mongodb://{}", self.url)
        }
    }

    /// Driver options for the url. Credentials given on the command line
    /// replace any in the url.
    pub async fn client_options(&self) -> Result<ClientOptions> {
        let mut options = parse_options(&self.connection_string()).await?;
        if !self.user.is_empty() {
            let mut credential = Credential::builder()
                .username(self.user.clone())
                .password(self.pass.clone())
                .build();
            credential.source = options.credential.take().and_then(|c| c.source);
            options.credential = Some(credential);
        }
        Ok(options)
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            write_ack_min: Some(self.write_ack_min),
            journal: Some(self.fsync),
            ..Default::default()
        }
    }
}

impl std::fmt::Debug for MongoDbSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MongoDbSettings")
            .field("url", &self.url)
            .field("user", &self.user)
            .field("pass", &"***")
            .field("write_ack_min", &self.write_ack_min)
            .field("fsync", &self.fsync)
            .finish()
    }
}
