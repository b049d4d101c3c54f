//! 外部程序调用。
//!
//! 所有数值计算都由外部程序完成，流水线只负责组织命令行并检查退出码。

use crate::error::{AtlasError, Result};
use crate::store::ArtifactStore;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// 一次外部程序调用。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Command {
    program: PathBuf,
    args: Vec<String>,
    current_dir: Option<PathBuf>,
    outputs: Vec<PathBuf>,
}

impl Command {
    #[inline]
    pub fn new<P: Into<PathBuf>>(program: P) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            outputs: Vec::new(),
        }
    }

    #[inline]
    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// 追加`flag value`。
    #[inline]
    pub fn flag<V: ToString>(self, flag: &str, value: V) -> Self {
        self.arg(flag).arg(value.to_string())
    }

    /// 追加`flag path`，`path`为输入。
    #[inline]
    pub fn input(self, flag: &str, path: &Path) -> Self {
        self.arg(flag).arg(path_arg(path))
    }

    /// 追加`flag path`，并登记`path`为该命令应产生的文件。
    #[inline]
    pub fn output(self, flag: &str, path: &Path) -> Self {
        self.input(flag, path).produces(path)
    }

    /// 登记一个不出现在命令行中的产出文件（例如脚本写在输入旁边的结果）。
    #[inline]
    pub fn produces(mut self, path: &Path) -> Self {
        self.outputs.push(path.to_path_buf());
        self
    }

    #[inline]
    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.current_dir = Some(dir.to_path_buf());
        self
    }

    #[inline]
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// 程序文件名，用于日志与错误信息。
    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .unwrap_or(self.program.as_os_str())
            .to_string_lossy()
            .into_owned()
    }

    #[inline]
    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    #[inline]
    pub fn get_current_dir(&self) -> Option<&Path> {
        self.current_dir.as_deref()
    }

    #[inline]
    pub fn outputs(&self) -> &[PathBuf] {
        &self.outputs
    }

    /// `flag`之后的第一个取值。
    pub fn value_of(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }

    /// `flag`之后的全部取值（用于可重复的标志，例如`-i`）。
    pub fn values_of<'a>(&'a self, flag: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.args
            .windows(2)
            .filter(move |w| w[0] == flag)
            .map(|w| w[1].as_str())
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for a in self.args.iter() {
            write!(f, " {a}")?;
        }
        Ok(())
    }
}

#[inline]
pub(crate) fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// 外部程序的运行结果。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Output {
    /// 退出码；被信号终止时为`None`。
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl Output {
    #[inline]
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// 运行外部程序的能力。
///
/// 只有无法启动进程时才返回`Err`；非零退出码由调用方通过[`run_checked`]判定。
pub trait Executor: Send + Sync {
    fn run(&self, cmd: &Command) -> Result<Output>;
}

/// 以子进程方式阻塞运行，捕获标准输出与标准错误。
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessExecutor;

impl Executor for ProcessExecutor {
    fn run(&self, cmd: &Command) -> Result<Output> {
        let mut proc = process::Command::new(cmd.program());
        proc.args(cmd.get_args());
        if let Some(dir) = cmd.get_current_dir() {
            proc.current_dir(dir);
        }
        let out = proc.output().map_err(|source| AtlasError::Spawn {
            program: cmd.program().display().to_string(),
            source,
        })?;
        Ok(Output {
            code: out.status.code(),
            stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
        })
    }
}

/// 运行命令，非零退出码视为失败；成功后检查登记的产出文件是否存在。
pub fn run_checked(
    executor: &dyn Executor,
    store: &dyn ArtifactStore,
    cmd: &Command,
) -> Result<Output> {
    info!(program = %cmd.program_name(), "running external command");
    debug!("{cmd}");
    let out = executor.run(cmd)?;
    if !out.stdout.is_empty() {
        debug!(program = %cmd.program_name(), "stdout:\n{}", out.stdout);
    }
    if !out.stderr.is_empty() {
        debug!(program = %cmd.program_name(), "stderr:\n{}", out.stderr);
    }
    if !out.success() {
        return Err(AtlasError::Process {
            program: cmd.program().display().to_string(),
            code: out.code,
            stdout: out.stdout,
            stderr: out.stderr,
        });
    }
    if let Some(missing) = cmd.outputs().iter().find(|p| !store.exists(p)) {
        return Err(AtlasError::MissingArtifact {
            program: cmd.program_name(),
            path: missing.clone(),
        });
    }
    Ok(out)
}

type FailurePredicate = Box<dyn Fn(&Command) -> bool + Send + Sync>;

/// 只记录命令而不真正运行的执行器。
///
/// 给定存储时，每条成功的命令会在存储中创建其登记的产出文件，
/// 从而可以在内存中完整走完一次图谱构建（测试与`--dry-run`）。
pub struct RecordingExecutor {
    store: Option<Arc<dyn ArtifactStore>>,
    commands: Mutex<Vec<Command>>,
    failure: Option<FailurePredicate>,
}

impl RecordingExecutor {
    #[inline]
    pub fn new() -> Self {
        Self {
            store: None,
            commands: Mutex::new(Vec::new()),
            failure: None,
        }
    }

    /// 成功的命令在`store`中生成其产出文件。
    #[inline]
    pub fn materializing(store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            store: Some(store),
            ..Self::new()
        }
    }

    /// 满足`pred`的命令以退出码1失败。
    pub fn fail_when<F>(mut self, pred: F) -> Self
    where
        F: Fn(&Command) -> bool + Send + Sync + 'static,
    {
        self.failure = Some(Box::new(pred));
        self
    }

    /// 迄今为止记录的全部命令（按调用顺序）。
    pub fn commands(&self) -> Vec<Command> {
        self.commands
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// 迄今为止调用过的程序名。
    pub fn programs(&self) -> Vec<String> {
        self.commands().iter().map(Command::program_name).collect()
    }

    pub fn clear(&self) {
        self.commands
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

impl Default for RecordingExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor for RecordingExecutor {
    fn run(&self, cmd: &Command) -> Result<Output> {
        self.commands
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(cmd.clone());

        if self.failure.as_ref().is_some_and(|fail| fail(cmd)) {
            return Ok(Output {
                code: Some(1),
                stdout: String::new(),
                stderr: format!("simulated failure of {}", cmd.program_name()),
            });
        }
        if let Some(store) = self.store.as_ref() {
            for out in cmd.outputs() {
                store.touch(out)?;
            }
        }
        Ok(Output {
            code: Some(0),
            ..Output::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemStore;

    #[test]
    fn builder_keeps_argument_order_and_outputs() {
        let cmd = Command::new("/opt/anima/animaImageArithmetic")
            .input("-i", Path::new("/w/field.nrrd"))
            .flag("-M", "-0.5")
            .output("-o", Path::new("/w/Tk.nrrd"));
        assert_eq!(
            cmd.get_args(),
            ["-i", "/w/field.nrrd", "-M", "-0.5", "-o", "/w/Tk.nrrd"]
        );
        assert_eq!(cmd.outputs(), [PathBuf::from("/w/Tk.nrrd")]);
        assert_eq!(cmd.program_name(), "animaImageArithmetic");
        assert_eq!(cmd.value_of("-M"), Some("-0.5"));
        assert_eq!(
            cmd.to_string(),
            "/opt/anima/animaImageArithmetic -i /w/field.nrrd -M -0.5 -o /w/Tk.nrrd"
        );
    }

    #[test]
    fn repeated_flags_are_all_visible() {
        let cmd = Command::new("gen").args(["-i", "a", "-i", "b", "-o", "c"]);
        assert_eq!(cmd.values_of("-i").collect::<Vec<_>>(), ["a", "b"]);
    }

    #[test]
    fn non_zero_exit_surfaces_captured_output() {
        let store = MemStore::new();
        let exec = RecordingExecutor::new().fail_when(|c| c.program_name() == "bad");
        let err = run_checked(&exec, &store, &Command::new("bad")).unwrap_err();
        match err {
            AtlasError::Process { code, stderr, .. } => {
                assert_eq!(code, Some(1));
                assert!(stderr.contains("bad"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn declared_outputs_must_exist_after_success() {
        let store = MemStore::new();
        let exec = RecordingExecutor::new();
        let cmd = Command::new("tool").output("-o", Path::new("/w/out.nrrd"));
        assert!(matches!(
            run_checked(&exec, &store, &cmd),
            Err(AtlasError::MissingArtifact { .. })
        ));

        let store = Arc::new(MemStore::new());
        let exec = RecordingExecutor::materializing(store.clone());
        run_checked(&exec, store.as_ref(), &cmd).unwrap();
        assert!(store.exists(Path::new("/w/out.nrrd")));
        assert_eq!(exec.programs(), ["tool"]);
    }

    #[cfg(unix)]
    #[test]
    fn process_executor_reports_exit_codes() {
        let ok = ProcessExecutor
            .run(&Command::new("sh").args(["-c", "echo hello"]))
            .unwrap();
        assert!(ok.success());
        assert_eq!(ok.stdout.trim(), "hello");

        let bad = ProcessExecutor
            .run(&Command::new("sh").args(["-c", "echo oops >&2; exit 4"]))
            .unwrap();
        assert_eq!(bad.code, Some(4));
        assert_eq!(bad.stderr.trim(), "oops");

        assert!(matches!(
            ProcessExecutor.run(&Command::new("/definitely/not/a/program")),
            Err(AtlasError::Spawn { .. })
        ));
    }
}
