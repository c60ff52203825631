use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};

use imagefeed::auth::{authorize_url, extract_code, reset_on_first_launch, FileTokenStore};
use imagefeed::feed::Photo;
use imagefeed::feed::FeedSynchronizer;
use imagefeed::util::{display_width, strip_control_chars, truncate_to_width, validate_url_for_open};
use imagefeed::{Config, Event, EventKind, Session};

const DEFAULT_WIDTH: usize = 100;

/// Get the config directory path (~/.config/imagefeed/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("imagefeed"))
}

/// Create the config directory if needed and restrict it to the current user.
fn prepare_config_dir(config_dir: &std::path::Path) -> Result<()> {
    if !config_dir.exists() {
        std::fs::create_dir_all(config_dir).context("Failed to create config directory")?;
        tracing::info!(path = %config_dir.display(), "Created config directory");
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o700);
        if let Err(e) = std::fs::set_permissions(config_dir, perms) {
            tracing::warn!(
                path = %config_dir.display(),
                error = %e,
                "Failed to set config directory permissions to 0700"
            );
        }
    }

    Ok(())
}

#[derive(Parser, Debug)]
#[command(name = "imagefeed", version, about = "Browse and like photos from the terminal")]
struct Args {
    /// Config file (default: ~/.config/imagefeed/config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in through the browser and store the access token
    Login {
        /// Authorization code (or the full redirect URL) if you already have one
        #[arg(long)]
        code: Option<String>,

        /// Print the authorization URL instead of opening a browser
        #[arg(long)]
        no_browser: bool,
    },
    /// Print the photo feed
    Feed {
        /// Number of pages to load
        #[arg(long, default_value_t = 1)]
        pages: u32,

        /// Output width in columns (default: $COLUMNS or 100)
        #[arg(long, value_name = "COLS")]
        width: Option<usize>,
    },
    /// Like a photo, or unlike it if already liked
    Like {
        /// Photo id as printed by `imagefeed feed`
        id: String,

        /// Pages to search for the photo
        #[arg(long, default_value_t = 5)]
        pages: u32,
    },
    /// Show one photo's details and open the full-size image
    Show {
        /// Photo id as printed by `imagefeed feed`
        id: String,

        /// Pages to search for the photo
        #[arg(long, default_value_t = 5)]
        pages: u32,

        /// Print the image URL instead of opening a browser
        #[arg(long)]
        no_browser: bool,
    },
    /// Show the signed-in user's profile
    Profile,
    /// Forget the stored token
    Logout,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    prepare_config_dir(&config_dir)?;

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let mut config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    config.apply_env();

    let tokens = Arc::new(FileTokenStore::new(&config_dir));
    match reset_on_first_launch(&config_dir, tokens.as_ref()) {
        Ok(true) => tracing::debug!("First launch detected"),
        Ok(false) => {}
        Err(e) => tracing::warn!(error = %e, "Failed to record first launch"),
    }

    let session = Session::new(&config, tokens).context("Failed to initialize session")?;

    match args.command {
        Command::Login { code, no_browser } => login(&session, &config, code, no_browser).await,
        Command::Feed { pages, width } => show_feed(&session, pages, width).await,
        Command::Like { id, pages } => toggle_like(&session, &id, pages).await,
        Command::Show { id, pages, no_browser } => show_photo(&session, &id, pages, no_browser).await,
        Command::Profile => show_profile(&session).await,
        Command::Logout => {
            session.logout();
            println!("Signed out.");
            Ok(())
        }
    }
}

async fn login(session: &Session, config: &Config, code: Option<String>, no_browser: bool) -> Result<()> {
    let input = match code {
        Some(code) => code,
        None => {
            let settings = config.oauth_settings()?;
            let url = authorize_url(&settings)?;
            println!("Authorize imagefeed at:\n\n  {url}\n");
            if !no_browser {
                if let Err(e) = open::that(url.as_str()) {
                    tracing::warn!(error = %e, "Failed to open browser");
                    eprintln!("Could not open a browser; visit the URL above manually.");
                }
            }
            prompt("Paste the authorization code or redirect URL: ").await?
        }
    };
    let code = extract_code(&input).context("No authorization code found in input")?;

    let profile = session.login(&code).await?;
    println!(
        "Signed in as {} ({})",
        strip_control_chars(&profile.name),
        strip_control_chars(&profile.login_name)
    );
    Ok(())
}

async fn prompt(message: &str) -> Result<String> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(message.as_bytes()).await?;
    stdout.flush().await?;

    let mut line = String::new();
    tokio::io::BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .context("Failed to read from stdin")?;
    Ok(line)
}

fn require_login(session: &Session) -> Result<()> {
    if !session.is_authenticated() {
        anyhow::bail!("Not signed in. Run `imagefeed login` first.");
    }
    Ok(())
}

async fn show_feed(session: &Session, pages: u32, width: Option<usize>) -> Result<()> {
    require_login(session)?;
    let width = width.unwrap_or_else(terminal_width);

    // Rows are printed as pages land, from the bus
    let printed = Arc::new(AtomicUsize::new(0));
    let _subscription = session.bus().subscribe(EventKind::FeedChanged, {
        let feed = session.feed().clone();
        let printed = Arc::clone(&printed);
        move |event| {
            if let Event::FeedExtended { total_count } = event {
                let start = printed.swap(*total_count, Ordering::SeqCst);
                for (index, photo) in feed.items().iter().enumerate().skip(start) {
                    println!("{}", render_row(index, photo, width));
                }
            }
        }
    });

    for _ in 0..pages {
        let before = session.feed().items().len();
        session.feed().load_next_page().await.context("Failed to load feed")?;
        if session.feed().items().len() == before {
            tracing::debug!("Empty page, stopping");
            break;
        }
    }

    println!("\n{} photos", printed.load(Ordering::SeqCst));
    Ok(())
}

/// Load pages until `id` is cached or `pages` pages have been tried.
async fn find_photo(feed: &FeedSynchronizer, id: &str, pages: u32) -> Result<Option<Photo>> {
    for _ in 0..pages {
        if let Some(photo) = feed.items().iter().find(|photo| photo.id == id) {
            return Ok(Some(photo.clone()));
        }
        let before = feed.items().len();
        feed.load_next_page().await.context("Failed to load feed")?;
        if feed.items().len() == before {
            break;
        }
    }
    Ok(feed.items().iter().find(|photo| photo.id == id).cloned())
}

async fn toggle_like(session: &Session, id: &str, pages: u32) -> Result<()> {
    require_login(session)?;
    let feed = session.feed();
    find_photo(feed, id, pages).await?;

    feed.toggle_like(id)
        .await
        .with_context(|| format!("Failed to toggle like on {id}"))?;

    let liked = feed
        .items()
        .iter()
        .find(|photo| photo.id == id)
        .map(|photo| photo.liked)
        .unwrap_or_default();
    println!("{} {}", if liked { "Liked" } else { "Unliked" }, strip_control_chars(id));
    Ok(())
}

async fn show_photo(session: &Session, id: &str, pages: u32, no_browser: bool) -> Result<()> {
    require_login(session)?;
    let photo = find_photo(session.feed(), id, pages)
        .await?
        .with_context(|| format!("Photo {} not found in the first {pages} pages", strip_control_chars(id)))?;

    println!("{}", render_detail(&photo));

    if no_browser {
        return Ok(());
    }
    match validate_url_for_open(&photo.full_url) {
        Ok(url) => {
            if let Err(e) = open::that(url.as_str()) {
                tracing::warn!(error = %e, "Failed to open browser");
                eprintln!("Could not open a browser; visit the URL above manually.");
            }
        }
        Err(e) => {
            tracing::warn!(photo_id = %photo.id, error = %e, "Refusing to open image URL");
            eprintln!("Not opening image URL: {e}");
        }
    }
    Ok(())
}

async fn show_profile(session: &Session) -> Result<()> {
    require_login(session)?;
    let profile = session.refresh_profile().await.context("Failed to load profile")?;

    println!("{}", strip_control_chars(&profile.name));
    println!("{}", strip_control_chars(&profile.login_name));
    if let Some(bio) = &profile.bio {
        println!("\n{}", strip_control_chars(bio));
    }
    if let Some(url) = session.profile().avatar_url() {
        println!("\nAvatar: {}", strip_control_chars(&url));
    }
    Ok(())
}

fn terminal_width() -> usize {
    std::env::var("COLUMNS")
        .ok()
        .and_then(|cols| cols.trim().parse().ok())
        .filter(|&cols| cols > 0)
        .unwrap_or(DEFAULT_WIDTH)
}

/// One line per photo: position, like marker, id, size, date, description.
fn render_row(index: usize, photo: &Photo, width: usize) -> String {
    let marker = if photo.liked { '♥' } else { '·' };
    let size = format!("{}x{}", photo.size.width, photo.size.height);
    let date = photo
        .created_at
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "-".repeat(10));
    let prefix = format!(
        "{:>4} {marker} {:<11} {size:>9} {date}  ",
        index + 1,
        strip_control_chars(&photo.id),
    );

    let description = photo
        .description
        .as_deref()
        .map(strip_control_chars)
        .unwrap_or_default()
        .replace(['\n', '\r', '\t'], " ");
    let budget = width.saturating_sub(display_width(&prefix));
    format!("{prefix}{}", truncate_to_width(&description, budget))
}

/// Multi-line detail view: metadata first, then the image URLs.
fn render_detail(photo: &Photo) -> String {
    let mut out = format!(
        "{}\n{}x{}",
        strip_control_chars(&photo.id),
        photo.size.width,
        photo.size.height
    );
    if let Some(created_at) = photo.created_at {
        out.push_str(&format!("  {}", created_at.format("%Y-%m-%d %H:%M UTC")));
    }
    if photo.liked {
        out.push_str("  ♥ liked");
    }
    if let Some(description) = photo.description.as_deref().map(strip_control_chars) {
        if !description.trim().is_empty() {
            out.push_str(&format!("\n\n{}", description.trim()));
        }
    }
    out.push_str(&format!(
        "\n\nFull:  {}\nThumb: {}",
        strip_control_chars(&photo.full_url),
        strip_control_chars(&photo.thumb_url)
    ));
    out
}
