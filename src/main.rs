use clap::{Parser, Subcommand};
use feed_publisher::classifier::classify;
use feed_publisher::clock::{Clock, SystemClock};
use feed_publisher::formatter;
use feed_publisher::fetcher::{FetchConfig, HttpFeedSource};
use feed_publisher::generator::OpenAiGenerator;
use feed_publisher::pipeline::IngestionPipeline;
use feed_publisher::publish::PublishLoop;
use feed_publisher::publisher::{LinkedInClient, SocialPublisher};
use feed_publisher::refresher::CredentialRefresher;
use feed_publisher::scheduler::Scheduler;
use feed_publisher::store::Store;
use feed_publisher::types::{NewPost, PostOrigin};
use feed_publisher::AppConfig;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "feed-publisher", about = "Feed-to-social-post publishing scheduler")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the scheduler and run until interrupted
    Run,
    /// Run one feed ingestion pass now
    Ingest,
    /// Run one publish pass now
    Publish,
    /// Move a post's slot to now so the next publish run picks it up
    ScheduleNow { post_id: Uuid },
    /// Create a manual draft post with templated formatting
    Draft {
        #[arg(long)]
        title: String,
        #[arg(long)]
        description: String,
        #[arg(long)]
        link: Option<String>,
    },
    /// Show store statistics and the upcoming posting slots
    Status,
    /// Print the authorization URL for the one-time OAuth handshake
    AuthUrl,
    /// Exchange an authorization code for a credential and store it
    Auth { code: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = AppConfig::from_env()?;
    let store = Arc::new(Store::connect(&config.database_url).await?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let source = Arc::new(HttpFeedSource::new(config.feed_urls(), FetchConfig::default()));
    let generator = Arc::new(OpenAiGenerator::new(&config.generation));
    let linkedin = Arc::new(LinkedInClient::new(config.social.clone()));
    let publisher: Arc<dyn SocialPublisher> = linkedin.clone();

    let pipeline = Arc::new(IngestionPipeline::new(
        store.clone(),
        source,
        generator,
        config.posting.clone(),
        clock.clone(),
    ));
    let publish_loop = Arc::new(PublishLoop::new(
        store.clone(),
        publisher.clone(),
        clock.clone(),
        config.posting.include_images,
    ));
    let refresher = Arc::new(CredentialRefresher::new(
        store.clone(),
        publisher.clone(),
        clock.clone(),
    ));
    let scheduler = Scheduler::new(
        store.clone(),
        pipeline,
        publish_loop,
        refresher,
        config.posting.clone(),
        config.intervals,
        clock,
    );

    match Cli::parse().command.unwrap_or(Command::Run) {
        Command::Run => {
            scheduler.start();
            info!("Running; press ctrl-c to stop");
            tokio::signal::ctrl_c().await?;
            scheduler.stop().await;
        }
        Command::Ingest => {
            let report = scheduler.trigger_ingest().await?;
            println!(
                "Ingested {} items ({} new), created {} posts, {} stale, {} failed",
                report.fetched,
                report.new_items,
                report.posts_created,
                report.skipped_stale,
                report.failed
            );
        }
        Command::Publish => {
            let published = scheduler.trigger_publish().await?;
            println!("Published {published} posts");
        }
        Command::ScheduleNow { post_id } => {
            let post = scheduler.schedule_immediately(post_id).await?;
            println!("Post '{}' scheduled for immediate publishing", post.title);
        }
        Command::Draft {
            title,
            description,
            link,
        } => {
            let category = classify(&title, &description, &[]);
            let cleaned = formatter::clean_description(&description);
            let body = formatter::render_template(
                &title,
                &cleaned,
                link.as_deref().unwrap_or(""),
                category,
                config.posting.max_post_length,
            );
            let post = store
                .create_post(NewPost {
                    title,
                    body,
                    source_url: link,
                    image_url: None,
                    category,
                    origin: PostOrigin::Manual,
                    scheduled_at: None,
                })
                .await?;
            println!("Created {} draft {} ({})", post.category, post.id, post.title);
        }
        Command::Status => {
            let status = scheduler.status();
            println!("Scheduler running: {}", status.running);
            for job in scheduler.jobs() {
                println!("  job {} every {:?}", job.name, job.interval);
            }

            let stats = store.stats().await?;
            println!(
                "Posts: {} total ({} draft, {} scheduled, {} published, {} failed)",
                stats.total_posts,
                stats.draft_posts,
                stats.scheduled_posts,
                stats.published_posts,
                stats.failed_posts
            );
            println!(
                "Feed items: {} total ({} unprocessed)",
                stats.total_items, stats.unprocessed_items
            );

            println!("Next posting slots:");
            for slot in scheduler.next_schedule(4) {
                println!("  {} ({})", slot, slot.format("%A"));
            }

            for log in store.recent_logs(10).await? {
                println!(
                    "  [{}] {} {}",
                    log.created_at,
                    log.status.as_str(),
                    log.message
                );
            }
        }
        Command::AuthUrl => {
            println!("{}", linkedin.authorization_url()?);
        }
        Command::Auth { code } => {
            let credential = linkedin.exchange_code(&code).await?;
            store.store_credential(&credential).await?;
            println!("Credential stored, valid until {}", credential.expires_at);
        }
    }

    Ok(())
}
