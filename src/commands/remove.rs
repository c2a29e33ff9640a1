use anyhow::Result;
use log::debug;
use std::path::Path;

use super::{Options, Session, all_succeeded};
use crate::engine::{ConfirmationGate, UserDecision};
use crate::runtime::Runtime;

/// Remove the package a file installs, after showing what goes with it.
///
/// Returns `false` when the removal failed or could not be attempted. A
/// removal the user declines is not a failure.
#[tracing::instrument(skip(runtime, options))]
pub async fn remove<R: Runtime + Clone + 'static>(
    runtime: R,
    file: &Path,
    options: &Options,
) -> Result<bool> {
    let session = Session::open(runtime.clone(), options).await?;
    let Some(id) = session.admit_for_removal(file).await else {
        session.close().await?;
        return Ok(false);
    };

    let prompt = match session.queue().request_uninstall(id).await {
        Ok(prompt) => prompt,
        Err(err) => {
            session.refused(file, &err);
            session.finish().await?;
            return Ok(false);
        }
    };
    debug!("Removal of {} affects {:?}", prompt.target, prompt.affected);

    let decision = if options.yes {
        println!("{}", prompt);
        UserDecision::Confirm
    } else {
        ConfirmationGate::confirm_uninstall(&runtime, &prompt)?
    };

    if let Err(err) = session.queue().resolve_uninstall(&prompt, decision).await {
        session.refused(file, &err);
        session.finish().await?;
        return Ok(false);
    }

    if decision == UserDecision::Cancel {
        println!("Removal cancelled.");
        session.close().await?;
        return Ok(true);
    }

    let entries = session.finish().await?;
    Ok(all_succeeded(&entries))
}
