//! Metadata package export and import.

use crate::config::DeployConfig;
use crate::error::Result;
use crate::manifest::MetadataManifest;
use crate::ssh::RemoteExecutor;
use crate::stage::{scan_remote_log, StageOutcome};
use crate::utils::shell;
use crate::workdir::{self, WorkingDirectory};

pub fn export_command(config: &DeployConfig, work: &WorkingDirectory, objects: &[String]) -> String {
    let mut args = vec![
        config.path_to_exportpackage.clone(),
        "-disableX11".to_string(),
        "-profile".to_string(),
        config.export_profile().to_string(),
        "-package".to_string(),
        work.spk(workdir::METADATA_SPK),
        "-log".to_string(),
        work.log(workdir::LOG_METADATA_EXPORT),
        "-subprop".to_string(),
        work.spk(workdir::METADATA_SUBPROP),
        "-objects".to_string(),
    ];
    args.extend(objects.iter().cloned());
    shell::quote_args(&args)
}

pub fn import_command(config: &DeployConfig, work: &WorkingDirectory) -> String {
    shell::quote_args(&[
        config.path_to_importpackage.as_str(),
        "-disableX11",
        "-profile",
        config.meta_profile.as_str(),
        "-target",
        "/",
        "-package",
        &work.spk(workdir::METADATA_SPK),
        "-subprop",
        &work.spk(workdir::METADATA_SUBPROP),
        "--includeACL",
        "-preservePaths",
        "-log",
        &work.log(workdir::LOG_METADATA_IMPORT),
    ])
}

/// Export every manifest object into `spks/metadata.spk`.
pub fn export(
    executor: &dyn RemoteExecutor,
    config: &DeployConfig,
    work: &WorkingDirectory,
    manifest: &MetadataManifest,
) -> Result<StageOutcome> {
    let objects = manifest.object_lines();
    log_status!("metadata", "Exporting {} object(s)", objects.len());
    executor.run(&export_command(config, work, &objects), Some(work.root()), None)?;

    let diagnostics = scan_remote_log(executor, &work.log(workdir::LOG_METADATA_EXPORT));
    Ok(StageOutcome::done(
        format!("{} object(s) exported", objects.len()),
        diagnostics,
    ))
}

/// Import the exported package into the target metadata server.
pub fn import(
    executor: &dyn RemoteExecutor,
    config: &DeployConfig,
    work: &WorkingDirectory,
) -> Result<StageOutcome> {
    log_status!("metadata", "Importing {}", work.spk(workdir::METADATA_SPK));
    executor.run(&import_command(config, work), Some(work.root()), None)?;

    let diagnostics = scan_remote_log(executor, &work.log(workdir::LOG_METADATA_IMPORT));
    Ok(StageOutcome::done(work.spk(workdir::METADATA_SPK), diagnostics))
}
