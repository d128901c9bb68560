use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use protocol::{MovieEntity, MovieId, SearchMode};
use rand::seq::IndexedRandom;
use server::{MovieRequest, MovieService, SearchOutcome, ServiceConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use store::{InMemoryMovieStore, MovieStore};
use tokio::sync::Semaphore;
use tracing::debug;

use broker::InMemoryBroker;

/// movie-bus - movie commands over a partitioned log
#[derive(Parser)]
#[command(name = "movie-bus")]
#[command(about = "Submit movie commands and searches over an asynchronous command bus", long_about = None)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Movie CSV to load into the store before running the command
    #[arg(short, long)]
    seed: Option<PathBuf>,

    /// Override the search timeout (milliseconds)
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Override the partition count of every topic
    #[arg(long)]
    partitions: Option<usize>,

    /// How long to let the worker apply commands before reporting (milliseconds)
    #[arg(long, default_value = "200")]
    settle_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a movie
    Add {
        #[arg(long)]
        id: MovieId,
        #[arg(long)]
        title: String,
        #[arg(long)]
        genres: String,
    },

    /// Replace the title and genres of a movie
    Update {
        #[arg(long)]
        id: MovieId,
        #[arg(long)]
        title: String,
        #[arg(long)]
        genres: String,
    },

    /// Delete a movie
    Delete {
        #[arg(long)]
        id: MovieId,
    },

    /// Search by title or genres (case-insensitive substring match)
    Search {
        /// title or genres
        #[arg(long, default_value = "title")]
        by: SearchMode,

        query: String,
    },

    /// Publish a movie CSV (movieId,title,genres)
    Upload { file: PathBuf },

    /// Publish a rating CSV (userId,movieId,rating,timestamp)
    UploadRatings { file: PathBuf },

    /// Walk through create, update, search and delete
    Demo,

    /// Fire concurrent searches and report latency
    Benchmark {
        /// Number of searches to make
        #[arg(long, default_value = "100")]
        requests: usize,

        /// Number of searches in flight at once
        #[arg(long, default_value = "10")]
        concurrent: usize,
    },
}

/// A running service plus the handles the CLI reports from
struct Session {
    service: MovieService,
    broker: Arc<InMemoryBroker>,
    store: Arc<InMemoryMovieStore>,
    settle: Duration,
}

impl Session {
    /// Give the worker time to apply what was published
    async fn settle(&self) {
        tokio::time::sleep(self.settle).await;
    }

    /// Print what the error channel saw, if anything
    fn report_errors(&self) {
        let errors = self.service.errors();
        if errors.received() == 0 {
            return;
        }
        println!("{}", format!("Error channel ({} messages):", errors.received()).bold().red());
        for message in errors.recent() {
            println!("  {} {}", "✗".red(), message);
        }
    }

    async fn shutdown(self) -> Result<()> {
        self.service.shutdown().await?;
        self.broker.close();
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = ServiceConfig::load(cli.config.as_deref())?;
    if let Some(timeout_ms) = cli.timeout_ms {
        config = config.with_search_timeout_ms(timeout_ms);
    }
    if let Some(partitions) = cli.partitions {
        config = config.with_partitions(partitions);
    }
    debug!(?config, "Loaded configuration");

    let session = start_session(config, cli.seed.as_ref(), Duration::from_millis(cli.settle_ms)).await?;

    // Dispatch to appropriate command handler
    match cli.command {
        Commands::Add { id, title, genres } => handle_add(&session, id, title, genres).await?,
        Commands::Update { id, title, genres } => {
            handle_update(&session, id, title, genres).await?
        }
        Commands::Delete { id } => handle_delete(&session, id).await?,
        Commands::Search { by, query } => handle_search(&session, by, query).await?,
        Commands::Upload { file } => handle_upload(&session, &file, false).await?,
        Commands::UploadRatings { file } => handle_upload(&session, &file, true).await?,
        Commands::Demo => handle_demo(&session).await?,
        Commands::Benchmark {
            requests,
            concurrent,
        } => return handle_benchmark(session, requests, concurrent).await,
    }

    session.report_errors();
    session.shutdown().await
}

/// Start a broker, store and service, and optionally seed the store
async fn start_session(
    config: ServiceConfig,
    seed: Option<&PathBuf>,
    settle: Duration,
) -> Result<Session> {
    let broker = Arc::new(InMemoryBroker::new());
    let store = Arc::new(InMemoryMovieStore::new());
    let service = MovieService::start(config, broker.clone(), store.clone()).await?;
    let session = Session {
        service,
        broker,
        store,
        settle,
    };

    if let Some(path) = seed {
        let start = Instant::now();
        let movies = data_loader::load_movies(path)
            .with_context(|| format!("Failed to load {}", path.display()))?;
        let report = session.service.publish_movies(movies).await?;
        session.settle().await;
        println!(
            "{} Seeded {} movies in {:?}",
            "✓".green(),
            report.sent,
            start.elapsed()
        );
    }
    Ok(session)
}

/// Handle the 'add' command
async fn handle_add(session: &Session, id: MovieId, title: String, genres: String) -> Result<()> {
    let receipt = session
        .service
        .create(MovieRequest::new(id, title, genres))
        .await?;
    println!(
        "{} NEW accepted on {} partition {} offset {}",
        "✓".green(),
        receipt.topic,
        receipt.partition,
        receipt.offset
    );
    session.settle().await;

    // A NEW on a taken id is stored under a fresh id; this shows what holds `id` now
    if let Some(movie) = session.store.get(id).await? {
        print_movie(&movie);
    }
    Ok(())
}

/// Handle the 'update' command
async fn handle_update(session: &Session, id: MovieId, title: String, genres: String) -> Result<()> {
    let receipt = session
        .service
        .update(MovieRequest::new(id, title, genres))
        .await?;
    println!(
        "{} UPDATE accepted on partition {} offset {}",
        "✓".green(),
        receipt.partition,
        receipt.offset
    );
    session.settle().await;
    if let Some(movie) = session.store.get(id).await? {
        print_movie(&movie);
    }
    Ok(())
}

/// Handle the 'delete' command
async fn handle_delete(session: &Session, id: MovieId) -> Result<()> {
    session
        .service
        .delete(MovieRequest::new(id, "", ""))
        .await?;
    session.settle().await;
    if session.store.get(id).await?.is_none() && session.service.errors().received() == 0 {
        println!("{} Deleted movie {}", "✓".green(), id);
    }
    Ok(())
}

/// Handle the 'search' command
async fn handle_search(session: &Session, mode: SearchMode, query: String) -> Result<()> {
    let start = Instant::now();
    let outcome = session.service.search(mode, query.clone()).await?;
    println!(
        "{}",
        format!("Search by {} for '{}' ({:?}):", mode, query, start.elapsed())
            .bold()
            .blue()
    );
    print_outcome(&outcome);
    Ok(())
}

/// Handle the 'upload' and 'upload-ratings' commands
async fn handle_upload(session: &Session, file: &Path, ratings: bool) -> Result<()> {
    let report = if ratings {
        let ratings = data_loader::load_ratings(file)
            .with_context(|| format!("Failed to load {}", file.display()))?;
        session.service.publish_ratings(&ratings).await?
    } else {
        let movies = data_loader::load_movies(file)
            .with_context(|| format!("Failed to load {}", file.display()))?;
        session.service.publish_movies(movies).await?
    };
    println!("{} Published {} rows", "✓".green(), report.sent);
    for rejected in &report.rejected {
        println!("  {} {}", "✗".yellow(), rejected);
    }
    session.settle().await;
    println!("Store now holds {} movies", session.store.count().await?);
    Ok(())
}

/// Handle the 'demo' command
async fn handle_demo(session: &Session) -> Result<()> {
    let service = &session.service;
    let catalogue = [
        (1, "Inception", "Sci-Fi|Thriller"),
        (2, "Amadeus", "Drama|Music"),
        (3, "Interstellar", "Sci-Fi|Drama"),
    ];
    for (id, title, genres) in catalogue {
        service.create(MovieRequest::new(id, title, genres)).await?;
    }

    println!("{}", "1. Create Dune (id 5), then rename it".bold());
    service.create(MovieRequest::new(5, "Dune", "Sci-Fi")).await?;
    service
        .update(MovieRequest::new(5, "Dune Part Two", "Sci-Fi"))
        .await?;
    session.settle().await;
    if let Some(movie) = session.store.get(5).await? {
        print_movie(&movie);
    }

    println!("{}", "2. Search titles for 'Incep'".bold());
    print_outcome(&service.search(SearchMode::Title, "Incep").await?);

    println!("{}", "3. Search genres for 'sci'".bold());
    print_outcome(&service.search(SearchMode::Genres, "sci").await?);

    println!("{}", "4. Delete Dune, then delete a movie that does not exist".bold());
    service.delete(MovieRequest::new(5, "", "")).await?;
    service.delete(MovieRequest::new(99, "", "")).await?;
    session.settle().await;
    println!(
        "  Dune present: {}",
        session.store.get(5).await?.is_some()
    );
    Ok(())
}

/// Handle the 'benchmark' command
async fn handle_benchmark(session: Session, requests: usize, concurrent: usize) -> Result<()> {
    const QUERIES: [(SearchMode, &str); 6] = [
        (SearchMode::Title, "the"),
        (SearchMode::Title, "story"),
        (SearchMode::Title, "in"),
        (SearchMode::Genres, "drama"),
        (SearchMode::Genres, "sci"),
        (SearchMode::Genres, "comedy"),
    ];

    if session.store.count().await? == 0 {
        println!("{}", "Store is empty, use --seed for meaningful results".yellow());
    }

    // Pick every query up front: the thread-local rng must not cross an await
    let picks: Vec<(SearchMode, &str)> = {
        let mut rng = rand::rng();
        (0..requests)
            .filter_map(|_| QUERIES.choose(&mut rng).copied())
            .collect()
    };

    let Session {
        service,
        broker,
        store: _,
        settle: _,
    } = session;
    let service = Arc::new(service);
    let limit = Arc::new(Semaphore::new(concurrent.max(1)));

    let wall = Instant::now();
    let mut handles = vec![];
    for (mode, query) in picks {
        let service = service.clone();
        let limit = limit.clone();
        let handle = tokio::spawn(async move {
            let _permit = limit.acquire_owned().await?;
            let start = Instant::now();
            let outcome = service.search(mode, query).await?;
            Ok::<_, anyhow::Error>((start.elapsed(), outcome.is_complete()))
        });
        handles.push(handle);
    }

    // Wait for all tasks to complete and collect timings
    let mut timings = vec![];
    let mut timed_out = 0;
    for handle in handles {
        let (elapsed, complete) = handle.await??;
        if !complete {
            timed_out += 1;
        }
        timings.push(elapsed);
    }
    let wall_time = wall.elapsed();

    if timings.is_empty() {
        return Err(anyhow!("No requests were made"));
    }
    let total_time: Duration = timings.iter().sum();
    let avg_latency = total_time / (timings.len() as u32);
    timings.sort();
    let percentile = |p: f32| timings[((timings.len() as f32 * p) as usize).min(timings.len() - 1)];
    let throughput = timings.len() as f32 / wall_time.as_secs_f32();

    println!("{}", "Benchmark results:".bold().blue());
    println!("Requests: {} ({} timed out)", timings.len(), timed_out);
    println!("Wall time: {:?}", wall_time);
    println!("Average latency: {:?}", avg_latency);
    println!("P50 latency: {:?}", percentile(0.50));
    println!("P95 latency: {:?}", percentile(0.95));
    println!("P99 latency: {:?}", percentile(0.99));
    println!("Throughput: {:.2} searches/second", throughput);

    let service = Arc::try_unwrap(service).map_err(|_| anyhow!("Service still in use"))?;
    service.shutdown().await?;
    broker.close();
    Ok(())
}

fn print_movie(movie: &MovieEntity) {
    let rating = match movie.average_rating {
        Some(avg) => format!("avg {:.2} ({} ratings)", avg, movie.rating_count),
        None => "unrated".to_string(),
    };
    println!(
        "  {} {} [{}] {}",
        format!("#{}", movie.id).green(),
        movie.title,
        movie.genres,
        rating.dimmed()
    );
}

fn print_outcome(outcome: &SearchOutcome) {
    match outcome {
        SearchOutcome::Complete(movies) if movies.is_empty() => {
            println!("  {}", "No movies found".yellow());
        }
        SearchOutcome::Complete(movies) => {
            for movie in movies {
                print_movie(movie);
            }
        }
        SearchOutcome::TimedOut {
            partial,
            received,
            expected,
        } => {
            let expected = match expected {
                Some(n) => n.to_string(),
                None => "?".to_string(),
            };
            println!(
                "  {}",
                format!("Timed out with {} of {} results", received, expected).red()
            );
            for movie in partial {
                print_movie(movie);
            }
        }
    }
}
