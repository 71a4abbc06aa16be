//! Build invocation: run `make` in the program root.

use std::path::PathBuf;
use std::process::Command;

use crate::error::{DeployError, Result};
use crate::repo::Program;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MakeCommand {
    pub program: String,
    pub dir: PathBuf,
    pub jobs: usize,
    /// Targets and variable assignments passed through verbatim.
    pub args: Vec<String>,
}

impl MakeCommand {
    /// Build command for `program` using its `make` and `jobs` settings.
    pub fn new(program: &Program) -> Result<Self> {
        Ok(Self {
            program: program.settings.make_program(),
            dir: program.root.clone(),
            jobs: program.settings.jobs()?,
            args: Vec::new(),
        })
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    fn argv(&self) -> Vec<String> {
        let mut argv = vec![
            "-C".to_string(),
            self.dir.display().to_string(),
            format!("-j{}", self.jobs),
        ];
        argv.extend(self.args.iter().cloned());
        argv
    }

    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.argv());
        cmd
    }

    /// Command line as shown to the user.
    pub fn display(&self) -> String {
        std::iter::once(self.program.clone())
            .chain(self.argv())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Run the build, inheriting stdio.
    pub fn run(&self) -> Result<()> {
        tracing::info!("running {}", self.display());
        let status = self
            .command()
            .status()
            .map_err(|e| DeployError::io(std::path::Path::new(&self.program), e))?;
        if status.success() {
            Ok(())
        } else {
            Err(DeployError::Build {
                command: self.display(),
                status: status
                    .code()
                    .map_or_else(|| "a signal".to_string(), |c| format!("status {c}")),
            })
        }
    }
}
