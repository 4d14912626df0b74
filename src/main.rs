//! tpm2-policysecret - extend a policy session with TPM2_PolicySecret
//!
//! Couples a policy to the auth value of an object, NV index or hierarchy.
//! Prints the resulting policy digest on stdout.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::debug;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use tpm2_policysecret::auth_session::AuthSpec;
use tpm2_policysecret::config::{self, EntityLocator, Nonce, PolicySecretConfig};
use tpm2_policysecret::context::TpmContext;
use tpm2_policysecret::device::SoftTpm;
use tpm2_policysecret::error::ConfigError;
use tpm2_policysecret::exit_codes::{codes, exit_code_for};
use tpm2_policysecret::files::FsStore;

/// Enables binding a policy to the authorization value of the authorizing
/// object
#[derive(Parser, Debug)]
#[command(name = "tpm2-policysecret")]
#[command(version, about, long_about = None)]
struct Cli {
    /// File to save the policy digest to
    #[arg(short = 'L', long = "policy")]
    policy: Option<PathBuf>,

    /// Policy session context file
    #[arg(short = 'S', long = "session")]
    session: Option<PathBuf>,

    /// Handle, hierarchy or context file of the object whose auth is proven
    #[arg(short = 'c', long = "object-context")]
    object_context: Option<String>,

    /// Seconds the authorization stays valid; negative asks for a ticket
    #[arg(short = 't', long = "expiration", allow_hyphen_values = true)]
    expiration: Option<String>,

    /// File holding the session's nonceTPM, or `-` for stdin
    #[arg(short = 'x', long = "nonce-tpm")]
    nonce_tpm: Option<String>,

    /// File to save the auth ticket to
    #[arg(long)]
    ticket: Option<PathBuf>,

    /// File to save the ticket timeout to
    #[arg(long)]
    timeout: Option<PathBuf>,

    /// File holding the policyRef qualifier
    #[arg(short = 'q', long = "qualification")]
    qualification: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Auth value of the object given with -c
    auth: Option<String>,
}

impl TryFrom<Cli> for PolicySecretConfig {
    type Error = ConfigError;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let expiration = cli
            .expiration
            .as_deref()
            .map(config::parse_expiration)
            .transpose()?
            .unwrap_or(0);
        let nonce_tpm = match cli.nonce_tpm.as_deref() {
            Some(location) => config::load_nonce(&FsStore, location)?,
            None => Nonce::default(),
        };
        let entity = match cli.object_context {
            Some(context_path) => Some(EntityLocator {
                context_path,
                auth: AuthSpec::parse(cli.auth.as_deref())?,
            }),
            None => None,
        };

        Ok(PolicySecretConfig {
            policy_session: cli.session,
            entity,
            expiration,
            nonce_tpm,
            qualifier_data: cli.qualification,
            policy_digest_out: cli.policy,
            ticket_out: cli.ticket,
            timeout_out: cli.timeout,
        })
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logs go to stderr; stdout only carries the digest
    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = match PolicySecretConfig::try_from(cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("ERROR: {e}");
            return ExitCode::from(codes::OPTION_ERROR);
        }
    };
    debug!(expiration = config.expiration, "starting policysecret");

    let mut backend = TpmContext::new(SoftTpm::new(), FsStore);
    match tpm2_policysecret::execute(&mut backend, &FsStore, &config) {
        Ok(outcome) => {
            println!("{}", hex::encode(&outcome.policy_digest));
            ExitCode::from(codes::SUCCESS)
        }
        Err(e) => {
            eprintln!("ERROR: {e}");
            ExitCode::from(exit_code_for(&e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_full_option_set() {
        let cli = Cli::try_parse_from([
            "tpm2-policysecret",
            "-S",
            "session.ctx",
            "-c",
            "o",
            "-t",
            "-30",
            "-L",
            "policy.digest",
            "--ticket",
            "ticket.bin",
            "--timeout",
            "timeout.bin",
            "-q",
            "qual.bin",
            "str:ownerpw",
        ])
        .unwrap();
        assert_eq!(cli.expiration.as_deref(), Some("-30"));
        assert_eq!(cli.auth.as_deref(), Some("str:ownerpw"));

        let config = PolicySecretConfig::try_from(cli).unwrap();
        assert_eq!(config.expiration, -30);
        assert_eq!(config.policy_session, Some(PathBuf::from("session.ctx")));
        assert_eq!(config.qualifier_data, Some(PathBuf::from("qual.bin")));
        assert!(matches!(
            config.entity.unwrap().auth,
            AuthSpec::Password(_)
        ));
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["tpm2-policysecret", "-S", "s.ctx", "-c", "e"]).unwrap();
        assert_eq!(cli.log_level, "warn");
        let config = PolicySecretConfig::try_from(cli).unwrap();
        assert_eq!(config.expiration, 0);
        assert!(config.nonce_tpm.as_bytes().is_empty());
        assert!(matches!(config.entity.unwrap().auth, AuthSpec::Empty));
        assert!(config.ticket_out.is_none());
    }

    #[test]
    fn test_cli_missing_session_is_config_error() {
        let cli = Cli::try_parse_from(["tpm2-policysecret", "-c", "o"]).unwrap();
        let config = PolicySecretConfig::try_from(cli).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::MissingSession)));
    }

    #[test]
    fn test_cli_bad_expiration() {
        let cli =
            Cli::try_parse_from(["tpm2-policysecret", "-S", "s.ctx", "-c", "o", "-t", "soon"])
                .unwrap();
        assert!(matches!(
            PolicySecretConfig::try_from(cli),
            Err(ConfigError::InvalidExpiration(_))
        ));
    }

    #[test]
    fn test_cli_unknown_flag_rejected() {
        assert!(Cli::try_parse_from(["tpm2-policysecret", "--bogus"]).is_err());
    }
}
