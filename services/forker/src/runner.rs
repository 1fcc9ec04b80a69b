//! Per-kind command builders.
//!
//! A runner turns an [`IsolateDescriptor`] into a ready-to-spawn command.
//! The forker picks the runner by isolate kind and owns the spawned child.

use std::path::PathBuf;
use std::process::Stdio;

use orbit_events::IsolateDescriptor;
use tokio::process::Command;

use crate::error::ForkerError;

/// Node-wide settings passed to every launched isolate.
#[derive(Debug, Clone, Default)]
pub struct LaunchContext {
    pub node: String,
    pub home: PathBuf,
    pub base: PathBuf,
    pub broker_url: Option<String>,
}

impl LaunchContext {
    /// Environment for an isolate process. Descriptor entries override the
    /// platform variables.
    pub fn environment(&self, descriptor: &IsolateDescriptor) -> Vec<(String, String)> {
        let mut env = vec![
            ("ORBIT_ISOLATE_UID".to_string(), descriptor.uid.to_string()),
            ("ORBIT_ISOLATE_NAME".to_string(), descriptor.name.clone()),
            ("ORBIT_ISOLATE_KIND".to_string(), descriptor.kind.clone()),
            (
                "ORBIT_NODE_NAME".to_string(),
                descriptor.node.clone().unwrap_or_else(|| self.node.clone()),
            ),
            ("ORBIT_HOME".to_string(), self.home.display().to_string()),
            ("ORBIT_BASE".to_string(), self.base.display().to_string()),
        ];
        if let Some(url) = &self.broker_url {
            env.push(("ORBIT_BROKER_URL".to_string(), url.clone()));
        }
        if let Some(port) = descriptor.port {
            env.push(("ORBIT_PORT".to_string(), port.to_string()));
        }

        for (key, value) in &descriptor.env {
            match env.iter_mut().find(|(k, _)| k == key) {
                Some(slot) => slot.1 = value.clone(),
                None => env.push((key.clone(), value.clone())),
            }
        }
        env
    }
}

/// Builds the command that runs one kind of isolate.
pub trait IsolateRunner: Send + Sync {
    /// Isolate kind this runner handles.
    fn kind(&self) -> &str;

    fn command(
        &self,
        descriptor: &IsolateDescriptor,
        ctx: &LaunchContext,
    ) -> Result<Command, ForkerError>;
}

/// Runs isolates as `program [args..] [descriptor.args..]`.
#[derive(Debug, Clone)]
pub struct ExecRunner {
    kind: String,
    program: PathBuf,
    args: Vec<String>,
}

impl ExecRunner {
    pub fn new(kind: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            kind: kind.into(),
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn program(&self) -> &std::path::Path {
        &self.program
    }

    /// Full argument list for a descriptor.
    pub fn arguments(&self, descriptor: &IsolateDescriptor) -> Vec<String> {
        self.args
            .iter()
            .chain(descriptor.args.iter())
            .cloned()
            .collect()
    }
}

impl IsolateRunner for ExecRunner {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn command(
        &self,
        descriptor: &IsolateDescriptor,
        ctx: &LaunchContext,
    ) -> Result<Command, ForkerError> {
        if self.program.as_os_str().is_empty() {
            return Err(ForkerError::InvalidRequest(format!(
                "no program configured for kind {}",
                self.kind
            )));
        }

        let mut cmd = Command::new(&self.program);
        cmd.args(self.arguments(descriptor))
            .envs(ctx.environment(descriptor))
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        if ctx.home.is_dir() {
            cmd.current_dir(&ctx.home);
        }

        // Own process group, so a stop reaches the isolate's children too.
        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        Ok(cmd)
    }
}
