pub mod classifier;
pub mod clock;
pub mod config;
pub mod fetcher;
pub mod formatter;
pub mod generator;
pub mod pipeline;
pub mod publish;
pub mod publisher;
pub mod refresher;
pub mod scheduler;
pub mod slots;
pub mod store;
pub mod types;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::AppConfig;
pub use fetcher::{FeedSource, FetchConfig, HttpFeedSource, StaticFeedSource};
pub use generator::{ContentGenerator, MockGenerator, OpenAiGenerator};
pub use pipeline::IngestionPipeline;
pub use publish::PublishLoop;
pub use publisher::{LinkedInClient, MockPublisher, SocialPublisher};
pub use refresher::CredentialRefresher;
pub use scheduler::{Scheduler, SchedulerStatus};
pub use slots::SlotAllocator;
pub use store::Store;
pub use types::*;
