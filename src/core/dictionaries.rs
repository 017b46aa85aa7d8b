//! Dictionary refresh from per-ticket `<ticket>_mds.txt` lists.

use serde::Serialize;

use crate::assemble::{OverrideFragment, DICTIONARY_SUFFIX};
use crate::config::{DeployConfig, Environment};
use crate::error::Result;
use crate::sas;
use crate::ssh::{RemoteExecutor, TextEncoding};
use crate::stage::StageOutcome;
use crate::utils::remote_path;
use crate::workdir::{self, WorkingDirectory};

const PROGRAM: &str = "update_dictionaries.sas";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DictionaryUpdate {
    pub ticket: String,
    pub dictionary: String,
}

impl DictionaryUpdate {
    pub fn macro_call(&self, env: Environment) -> String {
        format!(
            "%usr_zaktualizuj_slownik(slownik={}, id_zadania={}, srodowisko_docelowe={});",
            self.dictionary,
            self.ticket,
            env.as_str()
        )
    }
}

/// Dictionary updates listed in the package, in ticket order.
pub fn collect(executor: &dyn RemoteExecutor, work: &WorkingDirectory) -> Result<Vec<DictionaryUpdate>> {
    let dir = work.extra_files_dir();
    if !executor.exists(&dir)? {
        return Ok(Vec::new());
    }

    let mut lists: Vec<OverrideFragment> = executor
        .list_dir(&dir)?
        .iter()
        .filter_map(|name| OverrideFragment::parse(name))
        .filter(|fragment| fragment.canonical == DICTIONARY_SUFFIX)
        .collect();
    lists.sort_by(|a, b| {
        (&a.ticket_prefix, a.ticket_number).cmp(&(&b.ticket_prefix, b.ticket_number))
    });

    let mut updates = Vec::new();
    for list in lists {
        let text = executor.read_file(
            &remote_path::join(&dir, &list.file_name),
            TextEncoding::Latin1,
        )?;
        updates.extend(
            text.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(|dictionary| DictionaryUpdate {
                    ticket: list.ticket_id(),
                    dictionary: dictionary.to_string(),
                }),
        );
    }
    Ok(updates)
}

pub fn render_program(updates: &[DictionaryUpdate], env: Environment) -> String {
    updates
        .iter()
        .map(|update| format!("{}\n", update.macro_call(env)))
        .collect()
}

/// Generate and run the dictionary update program.
pub fn update(
    executor: &dyn RemoteExecutor,
    config: &DeployConfig,
    work: &WorkingDirectory,
    env: Environment,
) -> Result<StageOutcome> {
    let updates = collect(executor, work)?;
    if updates.is_empty() {
        return Ok(StageOutcome::skipped("no dictionary lists in the package"));
    }

    let program = work.path(PROGRAM);
    executor.write_file(&program, &render_program(&updates, env), TextEncoding::Latin1)?;
    log_status!("dictionaries", "Updating {} dictionary(ies)", updates.len());

    let log = work.log(workdir::LOG_UPDATE_DICTIONARIES);
    let diagnostics = sas::run_program(executor, config, work, &program, &log, Some(env))?;
    Ok(StageOutcome::done(
        format!("{} dictionary update(s)", updates.len()),
        diagnostics,
    ))
}
