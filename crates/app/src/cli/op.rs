use std::error::Error;
use std::path::PathBuf;

use common::auth::{Caller, Credentials, Dispatcher, Identity, TicketValidator, Verdict, TICKET_HEADER};
use common::error::CasError;
use service::{ServiceCas, ServiceState, StateSetupError};

use crate::state::{AppState, StateError};

/// Realm used when `--realm` is not given
pub const DEFAULT_REALM: &str = "local";

/// Token id recorded as the creator of everything the CLI writes
pub const LOCAL_TOKEN_ID: &str = "local-cli";

#[derive(Clone, Debug)]
pub struct OpContext {
    /// Optional custom config path (defaults to ~/.casket)
    pub config_path: Option<PathBuf>,
    /// Realm every command acts in
    pub realm: String,
    /// Act as the bearer of this ticket instead of the local owner
    pub ticket: Option<String>,
}

impl OpContext {
    pub fn new(config_path: Option<PathBuf>, realm: String) -> Self {
        Self {
            config_path,
            realm,
            ticket: None,
        }
    }

    pub fn with_ticket(mut self, ticket: Option<String>) -> Self {
        self.ticket = ticket;
        self
    }

    fn credentials(&self) -> Credentials {
        match &self.ticket {
            Some(id) => Credentials::new().with(TICKET_HEADER, id.clone()),
            None => Credentials::new(),
        }
    }

    /// A presented ticket wins; with no credentials at all the caller is
    ///  the full-rights local owner of the realm.
    fn dispatcher(&self) -> Dispatcher {
        let realm = self.realm.clone();
        Dispatcher::new()
            .push(TicketValidator)
            .push(move |credentials: &Credentials| {
                if credentials.is_empty() {
                    Verdict::Accepted(Identity::full(realm.clone(), LOCAL_TOKEN_ID).into())
                } else {
                    Verdict::Declined
                }
            })
    }

    /// Load the casket directory and open the service state over it.
    pub async fn open(&self) -> Result<Session, OpenError> {
        let app = AppState::load(self.config_path.clone())?;
        let caller = self.dispatcher().authenticate(&self.credentials()).await?;
        let state = ServiceState::from_config(&app.config).await?;
        tracing::debug!(dir = %app.casket_dir.display(), realm = %self.realm, "opened casket");
        Ok(Session { app, state, caller })
    }
}

/// An opened casket directory plus the authenticated caller.
#[derive(Debug)]
pub struct Session {
    pub app: AppState,
    pub state: ServiceState,
    pub caller: Caller,
}

impl Session {
    pub fn cas(&self) -> &ServiceCas {
        self.state.cas()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error("failed to open service state: {0}")]
    Service(#[from] StateSetupError),
    #[error(transparent)]
    Auth(#[from] CasError),
}

#[async_trait::async_trait]
pub trait Op: Send + Sync {
    type Error: Error + Send + Sync + 'static;
    type Output;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error>;
}

#[macro_export]
macro_rules! command_enum {
    ($(($variant:ident, $type:ty)),* $(,)?) => {
        #[derive(Subcommand, Debug, Clone)]
        pub enum Command {
            $($variant($type),)*
        }

        #[derive(Debug)]
        pub enum OpOutput {
            $($variant(<$type as $crate::cli::op::Op>::Output),)*
        }

        #[derive(Debug, thiserror::Error)]
        pub enum OpError {
            $(
                #[error(transparent)]
                $variant(<$type as $crate::cli::op::Op>::Error),
            )*
        }

        #[async_trait::async_trait]
        impl $crate::cli::op::Op for Command {
            type Output = OpOutput;
            type Error = OpError;

            async fn execute(&self, ctx: &$crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
                match self {
                    $(
                        Command::$variant(op) => {
                            op.execute(ctx).await
                                .map(OpOutput::$variant)
                                .map_err(OpError::$variant)
                        },
                    )*
                }
            }
        }

        impl std::fmt::Display for OpOutput {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $(
                        OpOutput::$variant(output) => write!(f, "{}", output),
                    )*
                }
            }
        }
    };
}
