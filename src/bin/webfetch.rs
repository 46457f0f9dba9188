//! CLI binary for edgequake-webfetch.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `FetchConfig` / `FetchRequest` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_webfetch::{
    fetch, FetchConfig, FetchProgressCallback, FetchRequest, FileResourceStore, OriginPolicy,
    OutputMode, ProgressCallback, ResourceStore,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a spinner while the document loads, then a bar
/// over the image window with one log line per image.
struct CliProgressCallback {
    bar: ProgressBar,
    skipped: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Fetching");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            skipped: AtomicUsize::new(0),
        })
    }

    /// Switch to the bar style once the window size is known.
    fn activate_bar(&self, total: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>2}/{len} images  ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);
        self.bar.set_length(total as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Images");
    }
}

impl FetchProgressCallback for CliProgressCallback {
    fn on_fetch_start(&self, url: &str) {
        self.bar.set_message(url.to_string());
    }

    fn on_document_complete(&self, final_url: &str, bytes: usize) {
        self.bar.println(format!(
            "{} {}  {}",
            cyan("◆"),
            bold(final_url),
            dim(&format!("{bytes} bytes"))
        ));
    }

    fn on_image_start(&self, index: usize, total: usize) {
        if self.bar.length() != Some(total as u64) {
            self.activate_bar(total);
        }
        self.bar.set_message(format!("image {index}"));
    }

    fn on_image_complete(&self, index: usize, _total: usize, bytes: usize) {
        self.bar.println(format!(
            "  {} Image {:>3}  {}",
            green("✓"),
            index,
            dim(&format!("{bytes:>8} bytes")),
        ));
        self.bar.inc(1);
    }

    fn on_image_skipped(&self, index: usize, _total: usize, reason: &str) {
        self.skipped.fetch_add(1, Ordering::SeqCst);
        self.bar
            .println(format!("  {} Image {:>3}  {}", red("✗"), index, red(reason)));
        self.bar.inc(1);
    }

    fn on_fetch_complete(&self, images_accepted: usize) {
        self.bar.finish_and_clear();
        let skipped = self.skipped.load(Ordering::SeqCst);
        if skipped == 0 {
            eprintln!(
                "{} fetched, {} image(s) accepted",
                green("✔"),
                bold(&images_accepted.to_string())
            );
        } else {
            eprintln!(
                "{} fetched, {} image(s) accepted  ({} skipped)",
                cyan("⚠"),
                bold(&images_accepted.to_string()),
                red(&skipped.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Readable text of a page (stdout)
  webfetch https://example.com/

  # Next chunk of a long page
  webfetch --start-index 20000 https://example.com/long-article

  # First three same-origin images as one inline JPEG, JSON output
  webfetch --images --max-images 3 --json https://example.com/gallery

  # Images from any origin, saved to disk
  webfetch --images --cross-origin --output-mode file --save-dir ./shots https://example.com/

  # Raw HTML, ignoring robots.txt
  webfetch --raw --ignore-robots https://example.com/

ENVIRONMENT VARIABLES:
  WEBFETCH_TIMEOUT_MS       Per-operation timeout (default 12000)
  WEBFETCH_MAX_REDIRECTS    Redirect hop budget (default 3)
  WEBFETCH_MAX_HTML_BYTES   Document body cap (default 2000000)
  WEBFETCH_MAX_IMAGE_BYTES  Single-image body cap (default 10000000)
  WEBFETCH_DISABLE_SSRF     Test only: disables private-address checks

SAFETY:
  Every request, including each redirect hop, robots.txt and every image, is
  checked against private, loopback, link-local and reserved addresses over
  all DNS records, and the connection is pinned to the addresses that passed.
"#;

/// Fetch web pages and their images without following anyone into your network.
#[derive(Parser, Debug)]
#[command(
    name = "webfetch",
    version,
    about = "Fetch a URL safely: SSRF guard, bounded redirects, capped bodies, image composite",
    long_about = "Fetch a web page and return its readable text, optionally with a window of its \
images stacked into a single JPEG. Private and reserved addresses are refused, redirects are \
followed manually and re-validated, and every body read is capped.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// HTTP/HTTPS URL to fetch.
    url: String,

    /// Acquire images referenced by the page and composite them.
    #[arg(long, env = "WEBFETCH_IMAGES")]
    images: bool,

    /// Index of the first image reference to consider.
    #[arg(long, default_value_t = 0)]
    image_start: usize,

    /// Number of image references to consider (0–10).
    #[arg(long, default_value_t = 3,
          value_parser = clap::value_parser!(u64).range(0..=10))]
    max_images: u64,

    /// Accept images from origins other than the page's.
    #[arg(long)]
    cross_origin: bool,

    /// Where the composite goes: inline, file, both.
    #[arg(long, env = "WEBFETCH_OUTPUT_MODE", value_enum, default_value = "inline")]
    output_mode: OutputModeArg,

    /// Directory for `file`/`both` output.
    #[arg(long, env = "WEBFETCH_SAVE_DIR", default_value = "webfetch-resources")]
    save_dir: PathBuf,

    /// Character offset into the extracted text.
    #[arg(long, default_value_t = 0)]
    start_index: usize,

    /// Maximum characters of text to return.
    #[arg(long, default_value_t = 20_000)]
    max_length: usize,

    /// Composite width cap in pixels (100–10000).
    #[arg(long, default_value_t = 1000,
          value_parser = clap::value_parser!(u32).range(100..=10_000))]
    max_width: u32,

    /// Composite height cap in pixels (100–10000).
    #[arg(long, default_value_t = 1600,
          value_parser = clap::value_parser!(u32).range(100..=10_000))]
    max_height: u32,

    /// JPEG quality (1–100; encoder caps at 85).
    #[arg(long, default_value_t = 80,
          value_parser = clap::value_parser!(u8).range(1..=100))]
    quality: u8,

    /// Return the body as served instead of extracted text.
    #[arg(long)]
    raw: bool,

    /// Skip the robots.txt check.
    #[arg(long)]
    ignore_robots: bool,

    /// Output structured JSON (FetchOutput) instead of text.
    #[arg(long, env = "WEBFETCH_JSON")]
    json: bool,

    /// Per-operation timeout in milliseconds (overrides WEBFETCH_TIMEOUT_MS).
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Redirect hop budget (overrides WEBFETCH_MAX_REDIRECTS).
    #[arg(long)]
    max_redirects: Option<u32>,

    /// Disable progress output.
    #[arg(long, env = "WEBFETCH_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "WEBFETCH_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "WEBFETCH_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum OutputModeArg {
    Inline,
    File,
    Both,
}

impl From<OutputModeArg> for OutputMode {
    fn from(v: OutputModeArg) -> Self {
        match v {
            OutputModeArg::Inline => OutputMode::Inline,
            OutputModeArg::File => OutputMode::File,
            OutputModeArg::Both => OutputMode::Both,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress output replaces INFO logs unless -v is given.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn FetchProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress_cb)?;
    let request = build_request(&cli);

    let store = if request.output_mode.persist() {
        Some(
            FileResourceStore::open(&cli.save_dir)
                .await
                .with_context(|| format!("Failed to open save directory {:?}", cli.save_dir))?,
        )
    } else {
        None
    };

    // ── Run fetch ────────────────────────────────────────────────────────
    let output = fetch(
        &request,
        &config,
        store.as_ref().map(|s| s as &dyn ResourceStore),
    )
    .await
    .context("Fetch failed")?;

    if cli.json {
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        println!("{json}");
        return Ok(());
    }

    let stdout = io::stdout();
    let mut handle = stdout.lock();
    handle
        .write_all(output.text.as_bytes())
        .context("Failed to write to stdout")?;
    if !output.text.ends_with('\n') {
        handle.write_all(b"\n").ok();
    }
    if output.remaining_chars > 0 {
        writeln!(
            handle,
            "\n[{} more characters; continue with --start-index {}]",
            output.remaining_chars,
            output.start_index + output.text.chars().count()
        )
        .ok();
    }

    if cli.quiet {
        return Ok(());
    }

    // Summary goes to stderr so stdout stays pipeable.
    if let Some(ref composite) = output.composite {
        eprintln!(
            "{}  composite {}×{}  {} image(s)  {}",
            green("✔"),
            composite.width,
            composite.height,
            composite.images_placed,
            dim(&format!("{} bytes", composite.bytes)),
        );
    }
    for locator in &output.locators {
        eprintln!("   {} {}", dim("saved"), bold(&locator.path.display().to_string()));
    }
    if output.remaining_images > 0 {
        eprintln!(
            "   {} more image(s); continue with --image-start {}",
            output.remaining_images,
            cli.image_start + cli.max_images as usize
        );
    }
    if !show_progress {
        for skipped in &output.skipped_images {
            eprintln!(
                "   {} image {} skipped: {}",
                red("✗"),
                skipped.index,
                skipped.reason
            );
        }
        eprintln!(
            "Fetched {} in {}ms ({} hop(s))",
            output.final_url, output.stats.total_duration_ms, output.stats.hops
        );
    }

    Ok(())
}

/// Map CLI args to `FetchConfig`, starting from the environment.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<FetchConfig> {
    let mut builder = FetchConfig::from_env();
    if let Some(ms) = cli.timeout_ms {
        builder = builder.timeout_ms(ms);
    }
    if let Some(n) = cli.max_redirects {
        builder = builder.max_redirects(n);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }
    builder.build().context("Invalid configuration")
}

/// Map CLI args to `FetchRequest`.
fn build_request(cli: &Cli) -> FetchRequest {
    let origin_policy = if cli.cross_origin {
        OriginPolicy::CrossOrigin
    } else {
        OriginPolicy::SameOrigin
    };
    FetchRequest::builder(cli.url.clone())
        .text_window(cli.start_index, cli.max_length)
        .images(cli.images)
        .image_window(cli.image_start, cli.max_images as usize)
        .origin_policy(origin_policy)
        .output_mode(cli.output_mode.into())
        .max_width(cli.max_width)
        .max_height(cli.max_height)
        .quality(cli.quality)
        .raw(cli.raw)
        .ignore_robots(cli.ignore_robots)
        .build()
}
