use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use qcimport_core::config::CONFIG_ENV_VAR;
use qcimport_core::{
    AppError, ImportPolicy, MalformedPolicy, ModuleFilter, DEFAULT_BUCKET, DEFAULT_PROJECT_PATH,
};
use std::path::PathBuf;

/// CLI configuration parsed from command line arguments and environment variables
#[derive(Parser, Debug)]
#[command(name = "qcimport")]
#[command(
    author,
    version,
    about = "Imports QC error-check definitions into a REDCap project"
)]
#[command(after_help = "Examples:
  qcimport import error-checks --profile nacc
  qcimport import error-checks --profile nacc --modules UDS,FTLD --dry-run
  qcimport import error-checks --profile nacc --fail-fast false --output json")]
pub struct Config {
    /// Path to the profiles file [default: <config dir>/qcimport/profiles.toml]
    #[arg(long, global = true, env = CONFIG_ENV_VAR, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log level or filter directive written to stderr (e.g. debug, qcimport_core=trace)
    #[arg(long, global = true, env = "QCIMPORT_LOG", default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Import data into REDCap
    #[command(subcommand)]
    Import(ImportCommand),
}

#[derive(Subcommand, Debug)]
pub enum ImportCommand {
    /// Load error checks from the QC rules bucket into the QC checks project
    #[command(after_help = "Examples:
  qcimport import error-checks --profile nacc                  # Import every module, stop at first failure
  qcimport import error-checks --profile nacc --modules ENROLL # Import one module
  qcimport import error-checks --profile nacc --dry-run        # Validate only")]
    ErrorChecks(ErrorChecksArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ErrorChecksArgs {
    /// Profile selecting the storage root and REDCap credentials
    #[arg(short, long)]
    pub profile: String,

    /// Bucket holding the error-check CSV files
    #[arg(short, long, default_value = DEFAULT_BUCKET)]
    pub bucket: String,

    /// Parameter path of the target REDCap project
    #[arg(long, default_value = DEFAULT_PROJECT_PATH)]
    pub redcap_project_path: String,

    /// Comma-separated module names, or "all"
    #[arg(short, long, default_value = "all", value_parser = parse_modules)]
    pub modules: ModuleFilter,

    /// Stop at the first failed file
    #[arg(long, default_value_t = true, action = ArgAction::Set, value_name = "BOOL")]
    pub fail_fast: bool,

    /// Validate every file without importing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Count files whose names do not match the check-file pattern as failures
    #[arg(long)]
    pub fail_on_malformed: bool,

    /// Report format written to stdout
    #[arg(short, long, default_value = "text")]
    pub output: OutputFormat,
}

impl ErrorChecksArgs {
    pub fn policy(&self) -> ImportPolicy {
        let malformed = if self.fail_on_malformed {
            MalformedPolicy::Fail
        } else {
            MalformedPolicy::Ignore
        };
        ImportPolicy::new(self.fail_fast, self.dry_run).with_malformed(malformed)
    }
}

/// Supported report formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Text,
    /// Pretty-printed JSON
    Json,
}

fn parse_modules(s: &str) -> Result<ModuleFilter, String> {
    s.parse().map_err(|e: AppError| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use qcimport_core::{Apply, OnFailure};

    fn parse(args: &[&str]) -> ErrorChecksArgs {
        let mut argv = vec!["qcimport", "import", "error-checks"];
        argv.extend_from_slice(args);
        match Config::try_parse_from(argv).unwrap().command {
            Command::Import(ImportCommand::ErrorChecks(args)) => args,
        }
    }

    #[test]
    fn test_defaults() {
        let args = parse(&["--profile", "nacc"]);
        assert_eq!(args.bucket, "nacc-qc-rules");
        assert_eq!(args.redcap_project_path, "/redcap/aws/qcchecks");
        assert_eq!(args.modules, ModuleFilter::All);
        assert!(args.fail_fast);
        assert!(!args.dry_run);
        assert_eq!(args.output, OutputFormat::Text);

        let policy = args.policy();
        assert_eq!(policy.on_failure, OnFailure::Abort);
        assert_eq!(policy.apply, Apply::Commit);
        assert_eq!(policy.malformed, MalformedPolicy::Ignore);
    }

    #[test]
    fn test_profile_is_required() {
        let result = Config::try_parse_from(["qcimport", "import", "error-checks"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_policy_flags() {
        let args = parse(&[
            "--profile",
            "nacc",
            "--fail-fast",
            "false",
            "--dry-run",
            "--fail-on-malformed",
            "--modules",
            "UDS,FTLD",
            "--output",
            "json",
        ]);
        let policy = args.policy();
        assert_eq!(policy.on_failure, OnFailure::Continue);
        assert_eq!(policy.apply, Apply::Simulate);
        assert_eq!(policy.malformed, MalformedPolicy::Fail);
        assert!(matches!(args.modules, ModuleFilter::Only(ref m) if m.len() == 2));
        assert_eq!(args.output, OutputFormat::Json);
    }

    #[test]
    fn test_bad_module_list_is_rejected() {
        let result = Config::try_parse_from([
            "qcimport",
            "import",
            "error-checks",
            "--profile",
            "nacc",
            "--modules",
            "all,UDS",
        ]);
        assert!(result.is_err());
    }
}
