//! Module registry lookup and code swap.

use crate::config::DeployConfig;
use crate::error::{Error, ModuleNotRegisteredDetails, Result};
use crate::sas;
use crate::ssh::{RemoteExecutor, TextEncoding};
use crate::utils::remote_path;
use crate::workdir::{self, WorkingDirectory};

pub const REGISTRY_TABLE: &str = "MDS.MODULY";
const LOOKUP_PROGRAM: &str = "get_module_path.sas";

/// SAS step writing the registered path of `module` into `output`.
pub fn lookup_program(module: &str, output: &str) -> String {
    let key = module.to_lowercase().replace('\'', "''");
    format!(
        "data _null_;\n\
         \x20 set {table}(where=(lowcase(MODUL)='{key}'));\n\
         \x20 file \"{output}\";\n\
         \x20 put SCIEZKA_DO_MODULU;\n\
         \x20 stop;\n\
         run;\n",
        table = REGISTRY_TABLE,
        key = key,
        output = output.replace('"', "\"\""),
    )
}

pub struct ModuleDeployer<'a> {
    executor: &'a dyn RemoteExecutor,
    config: &'a DeployConfig,
    work: &'a WorkingDirectory,
}

impl<'a> ModuleDeployer<'a> {
    pub fn new(
        executor: &'a dyn RemoteExecutor,
        config: &'a DeployConfig,
        work: &'a WorkingDirectory,
    ) -> Self {
        Self {
            executor,
            config,
            work,
        }
    }

    /// Registered deployment path for `module` (case-insensitive).
    pub fn resolve_module_path(&self, module: &str) -> Result<String> {
        let program = self.work.path(LOOKUP_PROGRAM);
        let output = self.work.path(workdir::MODULE_PATH_FILE);
        let log = self.work.log(workdir::LOG_GET_MODULE_PATH);

        self.executor
            .write_file(&program, &lookup_program(module, &output), TextEncoding::Utf8)?;
        sas::run_program(self.executor, self.config, self.work, &program, &log, None)?;

        let path = if self.executor.exists(&output)? {
            self.executor
                .read_file(&output, TextEncoding::Utf8)?
                .trim()
                .to_string()
        } else {
            String::new()
        };

        if path.is_empty() {
            return Err(Error::module_not_registered(ModuleNotRegisteredDetails {
                module: module.to_string(),
                registry: REGISTRY_TABLE.to_string(),
                log: Some(log),
            }));
        }

        log_status!("module", "{} is registered at {}", module, path);
        Ok(path)
    }

    /// Replace `<target>/kody` with the assembled code directory.
    ///
    /// Not transactional: a failure after the removal leaves the target
    /// without code.
    pub fn deploy_code(&self, target_path: &str, code_dir: &str) -> Result<String> {
        let destination = remote_path::join(target_path, remote_path::file_name(code_dir));
        log_status!("module", "Replacing {}", destination);
        self.executor.remove_all(&destination)?;
        self.executor.copy_recursive(code_dir, &destination)?;
        Ok(destination)
    }
}
