//! CLI error types with exit code handling
//!
//! Every command returns [`CliError`]; `main` renders it through miette and
//! exits with [`CliError::exit_code`].

use miette::Diagnostic;
use thiserror::Error;
use tuber_core::CoreError;
use tuber_kube::{KubeError, ReleaseError, Stage};

use crate::exit_codes;

#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    #[error("Invalid input: {message}")]
    #[diagnostic(code(tuber::cli::input))]
    Input {
        message: String,
        #[help]
        help: Option<String>,
    },

    #[error("Configuration error: {message}")]
    #[diagnostic(code(tuber::cli::config))]
    Config {
        message: String,
        #[help]
        help: Option<String>,
    },

    #[error("Render failed: {message}")]
    #[diagnostic(code(tuber::cli::render))]
    Render { message: String },

    #[error("Release failed: {message}")]
    #[diagnostic(
        code(tuber::cli::release),
        help("the release was rolled back; see the logs for rollback errors")
    )]
    Release { message: String },

    #[error("Release state was not saved: {message}")]
    #[diagnostic(
        code(tuber::cli::state_unsafe),
        help("the cluster runs the new release but the app record does not; rollback is not safe")
    )]
    StateUnsafe { message: String },

    #[error("App store error: {message}")]
    #[diagnostic(code(tuber::cli::store))]
    Store {
        message: String,
        #[help]
        help: Option<String>,
    },

    #[error("IO error: {message}")]
    #[diagnostic(code(tuber::cli::io))]
    Io { message: String },

    #[error("{message}")]
    #[diagnostic(code(tuber::cli::error))]
    Other { message: String },
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Input { .. } => exit_codes::INPUT_ERROR,
            CliError::Config { .. } => exit_codes::CONFIG_ERROR,
            CliError::Render { .. } => exit_codes::RENDER_ERROR,
            CliError::Release { .. } => exit_codes::RELEASE_FAILED,
            CliError::StateUnsafe { .. } => exit_codes::STATE_UNSAFE,
            CliError::Store { .. } => exit_codes::STORE_ERROR,
            CliError::Io { .. } => exit_codes::IO_ERROR,
            CliError::Other { .. } => exit_codes::ERROR,
        }
    }

    pub fn input(message: impl Into<String>) -> Self {
        Self::Input {
            message: message.into(),
            help: None,
        }
    }

    pub fn input_with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Input {
            message: message.into(),
            help: Some(help.into()),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            help: None,
        }
    }

    /// An app that is not in the store
    pub fn app_not_found(name: &str) -> Self {
        Self::Store {
            message: format!("app '{}' not found", name),
            help: Some(format!("create it with `tuber apps create {} <image>`", name)),
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::Io {
            message: err.to_string(),
        }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            e @ CoreError::InvalidResourceRef { .. } => CliError::input(e.to_string()),
            CoreError::Io(e) => CliError::from(e),
            other => CliError::Config {
                message: other.to_string(),
                help: Some("check the file named by --config or TUBER_CONFIG".to_string()),
            },
        }
    }
}

impl From<KubeError> for CliError {
    fn from(err: KubeError) -> Self {
        match err {
            KubeError::AppNotFound(name) => CliError::app_not_found(&name),
            KubeError::Io(e) => CliError::from(e),
            other => CliError::Store {
                message: other.to_string(),
                help: None,
            },
        }
    }
}

impl From<ReleaseError> for CliError {
    fn from(err: ReleaseError) -> Self {
        let message = err.to_string();
        match err.stage {
            Stage::LoadState => CliError::Store {
                message,
                help: None,
            },
            Stage::Resolve | Stage::Interpolation | Stage::Parse | Stage::Annotation => {
                CliError::Render { message }
            }
            stage if stage.is_rollback_unsafe() => CliError::StateUnsafe { message },
            _ => CliError::Release { message },
        }
    }
}

pub type Result<T> = std::result::Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;
    use tuber_core::ResourceRef;

    #[test]
    fn test_release_stages_map_to_exit_codes() {
        let apply = ReleaseError::apply(
            ResourceRef::new("Deployment", "web"),
            KubeError::Command {
                command: "kubectl apply".to_string(),
                message: "denied".to_string(),
            },
        );
        assert_eq!(CliError::from(apply).exit_code(), exit_codes::RELEASE_FAILED);

        let persist = ReleaseError::persist_state(KubeError::Storage("timeout".to_string()));
        assert_eq!(CliError::from(persist).exit_code(), exit_codes::STATE_UNSAFE);

        let parse = ReleaseError::parse(KubeError::InvalidManifest("bad".to_string()));
        assert_eq!(CliError::from(parse).exit_code(), exit_codes::RENDER_ERROR);
    }

    #[test]
    fn test_missing_app_has_help() {
        let err = CliError::from(KubeError::AppNotFound("shop".to_string()));
        assert_eq!(err.exit_code(), exit_codes::STORE_ERROR);
        assert!(matches!(err, CliError::Store { help: Some(ref h), .. } if h.contains("apps create shop")));
    }
}
