//! Command line surface. Most options can also come from `WEC_*`
//! environment variables.

use std::path::PathBuf;

use clap::{ArgAction, Parser};

#[derive(Clone, Debug, Parser)]
#[command(
    name = "evidence-collector",
    version,
    about = "Collects evidence of cookies, storage, beacons and websocket traffic from a website",
    after_help = "Example: evidence-collector http://example.com/about -f http://example.com -f http://cdn.ex.com -l http://example.com/contact"
)]
pub struct Cli {
    /// URI to inspect (http or https)
    pub url: String,

    /// Maximum number of extra first-party links to browse
    #[arg(short = 'm', long, default_value_t = 0, env = "WEC_MAX")]
    pub max: usize,

    /// Time to sleep after every page load in ms
    #[arg(short = 's', long, default_value_t = 3000, env = "WEC_SLEEP")]
    pub sleep: u64,

    /// First-party URIs for links and pages
    #[arg(short = 'f', long = "first-party-uri")]
    pub first_party_uri: Vec<String>,

    /// Adds a URI to the list of links for browsing
    #[arg(short = 'l', long = "browse-link")]
    pub browse_link: Vec<String>,

    /// Cookie string ("name=value;...") or Netscape cookie file to preset
    #[arg(short = 'c', long = "set-cookie")]
    pub set_cookie: Option<String>,

    /// Hides the browser window
    #[arg(
        long,
        default_value_t = true,
        action = ArgAction::Set,
        num_args = 0..=1,
        default_missing_value = "true",
        env = "WEC_HEADLESS"
    )]
    pub headless: bool,

    /// Send the Do-Not-Track header
    #[arg(long, default_value_t = false, env = "WEC_DNT")]
    pub dnt: bool,

    /// Set navigator.doNotTrack in every document; implies --dnt
    #[arg(long = "dnt-js", default_value_t = false, env = "WEC_DNT_JS")]
    pub dnt_js: bool,

    /// Output folder
    #[arg(short = 'o', long, default_value = "./output", env = "WEC_OUTPUT")]
    pub output: PathBuf,

    /// Skip writing any output files
    #[arg(long = "no-output", default_value_t = false)]
    pub no_output: bool,

    /// Overwrite a potentially existing output folder without warning
    #[arg(long, default_value_t = false)]
    pub overwrite: bool,

    /// Dump the inspection as YAML to stdout
    #[arg(short = 'y', long, default_value_t = false)]
    pub yaml: bool,

    /// Dump the inspection as JSON to stdout
    #[arg(short = 'j', long, default_value_t = false)]
    pub json: bool,

    /// Suppress console logging below errors
    #[arg(short = 'q', long, default_value_t = false)]
    pub quiet: bool,

    /// Title of the collection for display in output
    #[arg(short = 't', long)]
    pub title: Option<String>,

    /// Plain text or JSON for inclusion in the output files
    #[arg(long = "task-description")]
    pub task_description: Option<String>,

    /// Arguments passed over to the browser (Chrome)
    #[arg(long = "browser-options")]
    pub browser_options: Vec<String>,

    /// Directory containing a custom browser profile
    #[arg(short = 'p', long = "browser-profile")]
    pub browser_profile: Option<PathBuf>,

    /// Page load timeout in ms (0 to disable)
    #[arg(long = "page-timeout", default_value_t = 0, env = "WEC_PAGE_TIMEOUT")]
    pub page_timeout: u64,

    /// Browser language
    #[arg(long, default_value = "en", env = "WEC_LANG")]
    pub lang: String,

    /// Record top/bottom/full-page screenshots
    #[arg(
        long,
        default_value_t = true,
        action = ArgAction::Set,
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    pub screenshots: bool,

    /// Tracker filter list file(s); the first one is the primary list
    #[arg(long = "tracker-list")]
    pub tracker_list: Vec<PathBuf>,
}

impl Cli {
    /// `--dnt-js` implies the header variant.
    pub fn wants_dnt_header(&self) -> bool {
        self.dnt || self.dnt_js
    }

    pub fn output_dir(&self) -> Option<&PathBuf> {
        if self.no_output {
            None
        } else {
            Some(&self.output)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_original_example_invocation() {
        let cli = Cli::parse_from([
            "evidence-collector",
            "http://example.com/about",
            "-f",
            "http://example.com",
            "-f",
            "http://cdn.ex.com",
            "-l",
            "http://example.com/contact",
        ]);
        assert_eq!(cli.url, "http://example.com/about");
        assert_eq!(cli.first_party_uri.len(), 2);
        assert_eq!(cli.browse_link, vec!["http://example.com/contact"]);
        assert!(cli.headless);
        assert_eq!(cli.page_timeout, 0);
    }

    #[test]
    fn dnt_js_implies_dnt_header() {
        let cli = Cli::parse_from(["evidence-collector", "http://example.com", "--dnt-js"]);
        assert!(!cli.dnt);
        assert!(cli.wants_dnt_header());
    }

    #[test]
    fn no_output_suppresses_the_directory() {
        let cli = Cli::parse_from(["evidence-collector", "http://example.com", "--no-output"]);
        assert!(cli.output_dir().is_none());
    }
}
