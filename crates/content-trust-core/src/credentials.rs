use std::fmt::Debug;
use std::sync::Arc;
use std::{future::Future, pin::Pin};
use tokio::sync::OnceCell;

/// Remote service a credential is presented to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    Notary,
    Registry,
}

pub type CredentialResolverFn =
    Arc<dyn Fn(Service) -> Pin<Box<dyn Future<Output = Option<String>> + Send>> + Send + Sync>;

/// Produces the `Authorization` header value for each service.
#[derive(Clone)]
pub enum CredentialFactory {
    Anonymous,
    Static {
        notary: Option<String>,
        registry: Option<String>,
    },
    Dynamic {
        resolver_fn: CredentialResolverFn,
        notary: Arc<OnceCell<Option<String>>>,
        registry: Arc<OnceCell<Option<String>>>,
    },
}

impl CredentialFactory {
    pub fn new_from_resolver(resolver_fn: CredentialResolverFn) -> Self {
        Self::Dynamic {
            resolver_fn,
            notary: Arc::new(OnceCell::new()),
            registry: Arc::new(OnceCell::new()),
        }
    }

    pub fn new_static(notary: Option<String>, registry: Option<String>) -> Self {
        if notary.is_none() && registry.is_none() {
            return Self::Anonymous;
        }
        Self::Static { notary, registry }
    }

    /// Resolved header value for `service`, or `None` for anonymous access.
    /// Dynamic resolvers run at most once per service.
    pub async fn authorization(&self, service: Service) -> Option<String> {
        match self {
            Self::Anonymous => None,
            Self::Static { notary, registry } => match service {
                Service::Notary => notary.clone(),
                Service::Registry => registry.clone(),
            },
            Self::Dynamic {
                resolver_fn,
                notary,
                registry,
            } => {
                let cell = match service {
                    Service::Notary => notary,
                    Service::Registry => registry,
                };
                cell.get_or_init(|| async { (resolver_fn)(service).await })
                    .await
                    .clone()
            }
        }
    }
}

impl Debug for CredentialFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Anonymous => write!(f, "CredentialFactory::Anonymous"),
            Self::Static { .. } => write!(f, "CredentialFactory::Static"),
            Self::Dynamic { .. } => write!(f, "CredentialFactory::Dynamic"),
        }
    }
}
