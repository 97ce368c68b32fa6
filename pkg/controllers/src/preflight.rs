use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use pkg_kube::{ClusterClient, KubeError};
use pkg_task::TaskGroup;

/// Check every `(resource, verbs)` requirement against `client`, at most
/// `limit` checks at a time.
///
/// Returns `Ok(Some("<resource>-<verb>"))` for the first denial observed,
/// `Err` for the first failed check, and `Ok(None)` when everything is
/// allowed. Outstanding checks are cancelled as soon as the outcome is known.
pub async fn verify(
    client: Arc<dyn ClusterClient>,
    requirements: &[(&str, &[&str])],
    limit: usize,
    cancel: &CancellationToken,
) -> Result<Option<String>, KubeError> {
    let mut group = TaskGroup::new(limit, cancel);
    for (resource, verbs) in requirements {
        for verb in verbs.iter() {
            let client = client.clone();
            let resource = resource.to_string();
            let verb = verb.to_string();
            group.spawn(async move { client.has_permission(&resource, &verb).await });
        }
    }

    let expected = group.len();
    let mut finished = 0;
    while let Some(joined) = group.next().await {
        let check = match joined {
            Ok(check) => check,
            Err(e) => {
                error!("Permission check task died, aborting preflight: {}", e);
                group.cancel();
                return Err(KubeError::Task(e.to_string()));
            }
        };
        finished += 1;
        match check {
            Ok(result) if result.allowed => {
                debug!("Permission {} granted", result.identifier());
            }
            Ok(result) => {
                let denied = result.identifier();
                warn!("Permission {} denied, aborting preflight", denied);
                group.cancel();
                return Ok(Some(denied));
            }
            Err(e) => {
                warn!("Permission check failed, aborting preflight: {}", e);
                group.cancel();
                return Err(e);
            }
        }
    }

    if finished < expected {
        return Err(KubeError::Timeout("permission checks (cancelled)".into()));
    }
    Ok(None)
}
