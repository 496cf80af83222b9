use std::env;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{CommandFactory, Parser};
use clap_complete::{generate, Shell};
use ea_crawler::{
    crawl_site, default_file_name, CrawlerConfig, Downloadable, FormatError, OnError, Session,
    Site,
};

/// Election Archive crawler
#[derive(Debug, Parser)]
#[clap(version)]
pub struct Args {
    #[clap(subcommand)]
    pub cmd: SubCommand,
}

#[derive(Debug, clap::Subcommand)]
pub enum SubCommand {
    #[clap(name = "get")]
    Get(GetArgs),
    #[clap(name = "post")]
    Post(PostArgs),
    #[clap(name = "download")]
    Download(DownloadArgs),
    #[clap(hide = true)]
    Completion,
}

#[derive(Debug, clap::Args)]
pub struct CrawlerArgs {
    /// Directory holding the cache, files and data of the crawled site
    #[clap(parse(from_os_str), long, short, default_value = ".")]
    pub root: PathBuf,
    /// Optional default crawler yaml configuration file
    #[clap(env = "EA_CRAWLER_CONFIG", parse(from_os_str), long)]
    pub crawler_config: Option<PathBuf>,
    /// Override crawler's user agent
    #[clap(long)]
    pub user_agent: Option<String>,
    /// Override crawler's delay in seconds between two cached GET requests
    #[clap(long)]
    pub get_delay: Option<f32>,
    /// Override crawler's delay in seconds between two uncached GET requests
    #[clap(long)]
    pub get_uncached_delay: Option<f32>,
    /// Override crawler's delay in seconds between two POST requests
    #[clap(long)]
    pub post_delay: Option<f32>,
    /// Override crawler's request timeout in seconds
    #[clap(long)]
    pub timeout: Option<f32>,
    /// Override crawler's download error handling strategy
    #[clap(arg_enum, long)]
    pub on_dl_error: Option<OnError>,
    /// When quiet no logs are outputted
    #[clap(long, short)]
    pub quiet: bool,
}

impl TryFrom<&CrawlerArgs> for CrawlerConfig {
    type Error = anyhow::Error;

    fn try_from(args: &CrawlerArgs) -> Result<Self, Self::Error> {
        let mut conf = if let Some(path) = &args.crawler_config {
            let file = File::open(path)
                .with_context(|| format!("Couldn't open {}", path.display()))?;
            serde_yaml::from_reader(file)?
        } else {
            CrawlerConfig::default()
        };
        if let Some(user_agent) = &args.user_agent {
            conf.user_agent = user_agent.to_string();
        }
        if let Some(delay) = args.get_delay {
            conf.throttle.get = delay;
        }
        if let Some(delay) = args.get_uncached_delay {
            conf.throttle.get_uncached = delay;
        }
        if let Some(delay) = args.post_delay {
            conf.throttle.post = delay;
        }
        if let Some(timeout) = args.timeout {
            conf.timeout = Some(timeout);
        }
        if let Some(on_dl_error) = args.on_dl_error {
            conf.on_dl_error = on_dl_error;
        }
        Ok(conf)
    }
}

fn parse_key_val(s: &str) -> anyhow::Result<(String, String)> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| anyhow::anyhow!("Expected KEY=VALUE, got `{s}`"))?;
    Ok((key.to_string(), value.to_string()))
}

/// Fetch a page through the crawler cache and print it to stdout
#[derive(Debug, clap::Args)]
pub struct GetArgs {
    pub url: String,
    /// Query string parameter, may be repeated
    #[clap(long = "param", short, parse(try_from_str = parse_key_val))]
    pub params: Vec<(String, String)>,
    /// Neither read nor fill the HTTP cache
    #[clap(long)]
    pub no_cache: bool,
    #[clap(flatten)]
    pub crawler: CrawlerArgs,
}

pub fn get(args: GetArgs) -> anyhow::Result<()> {
    let conf = CrawlerConfig::try_from(&args.crawler)?;
    let session = Session::open(&args.crawler.root, &conf)?;
    let page = if args.no_cache {
        session.get_uncached_bytes(&args.url, &args.params)?
    } else {
        session.get_bytes(&args.url, &args.params)?
    };
    io::stdout().write_all(&page)?;
    Ok(())
}

/// Submit a form and print the response to stdout
#[derive(Debug, clap::Args)]
pub struct PostArgs {
    pub url: String,
    /// Form field, may be repeated
    #[clap(long = "field", short, parse(try_from_str = parse_key_val))]
    pub fields: Vec<(String, String)>,
    #[clap(flatten)]
    pub crawler: CrawlerArgs,
}

pub fn post(args: PostArgs) -> anyhow::Result<()> {
    let conf = CrawlerConfig::try_from(&args.crawler)?;
    let session = Session::open(&args.crawler.root, &conf)?;
    let page = session.post_bytes(&args.url, &args.fields)?;
    io::stdout().write_all(&page)?;
    Ok(())
}

/// Download documents into the files directory, skipping those already there
#[derive(Debug, clap::Args)]
#[clap(group = clap::ArgGroup::new("source").required(true))]
pub struct DownloadArgs {
    /// JSON array of `{"filename": ..., "url": ...}` objects
    #[clap(group = "source", parse(from_os_str), long, short)]
    pub manifest: Option<PathBuf>,
    /// A single document to download
    #[clap(group = "source", long)]
    pub url: Option<String>,
    /// Destination of `url` under the files directory, defaults to its last
    /// path segment
    #[clap(long, requires = "url")]
    pub path: Option<String>,
    #[clap(flatten)]
    pub crawler: CrawlerArgs,
}

#[derive(Debug, Clone)]
pub struct ManifestConfig {
    pub root: PathBuf,
    pub manifest: PathBuf,
}

/// A site whose documents are listed up front in a manifest file.
pub struct ManifestSite {
    conf: ManifestConfig,
}

impl Site for ManifestSite {
    type Config = ManifestConfig;

    fn new(config: &Self::Config) -> ea_crawler::Result<Self> {
        Ok(Self {
            conf: config.clone(),
        })
    }

    fn root(&self) -> &Path {
        &self.conf.root
    }

    fn downloadables(&mut self, _session: &Session) -> ea_crawler::Result<Vec<Downloadable>> {
        let path = &self.conf.manifest;
        let content = fs::read(path)?;
        let items = serde_json::from_slice(&content).map_err(|source| FormatError::Decode {
            path: path.clone(),
            source,
        })?;
        Ok(items)
    }

    fn finalizer(&mut self) {
        log::info!("Done with {}", self.conf.manifest.display());
    }
}

pub fn download(args: DownloadArgs) -> anyhow::Result<()> {
    let conf = CrawlerConfig::try_from(&args.crawler)?;
    let report = if let Some(manifest) = args.manifest {
        let site_conf = ManifestConfig {
            root: args.crawler.root,
            manifest,
        };
        crawl_site::<ManifestSite>(&conf, &site_conf)?
    } else if let Some(url) = args.url {
        let path = args
            .path
            .unwrap_or_else(|| default_file_name(&url).to_string());
        anyhow::ensure!(!path.is_empty(), "No file name in `{url}`, use --path");
        let session = Session::open(&args.crawler.root, &conf)?;
        session.download_all([Downloadable::new(path, url)], conf.on_dl_error)?
    } else {
        anyhow::bail!("Missing `manifest` or `url`");
    };
    for (item, e) in &report.failed {
        eprintln!("{item}: {e}");
    }
    anyhow::ensure!(
        report.is_complete(),
        "{} of {} downloads failed",
        report.failed.len(),
        report.len()
    );
    Ok(())
}

fn init_logger(crawler: &CrawlerArgs) {
    if !crawler.quiet {
        env::set_var("RUST_LOG", "ea_crawler=info,ea=info");
        env_logger::init();
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match args.cmd {
        SubCommand::Get(args) => {
            init_logger(&args.crawler);
            get(args)
        }
        SubCommand::Post(args) => {
            init_logger(&args.crawler);
            post(args)
        }
        SubCommand::Download(args) => {
            init_logger(&args.crawler);
            download(args)
        }
        SubCommand::Completion => {
            generate(Shell::Bash, &mut Args::command(), "ea", &mut io::stdout());
            Ok(())
        }
    }
}
