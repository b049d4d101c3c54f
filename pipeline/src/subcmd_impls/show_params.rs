use super::utils::registration_parameters;
use clap::Args;
use icatlas::toolkit::{DENSE_SVF_BM_REGISTRATION, PYRAMIDAL_BM_REGISTRATION};
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct ShowParams {
    /// TOML格式的配准参数文件，缺省时使用图谱构建的默认参数。
    #[arg(long = "reg-toml", short = 't')]
    reg_toml: Option<PathBuf>,
    /// 输出完整的TOML参数文件而不是命令行参数。
    #[arg(long = "toml")]
    toml: bool,
}

impl ShowParams {
    pub fn run(&mut self) -> anyhow::Result<()> {
        let params = registration_parameters(self.reg_toml.as_deref())?;
        if self.toml {
            print!("{}", params.to_toml()?);
            return Ok(());
        }
        println!("{PYRAMIDAL_BM_REGISTRATION} {}", params.rigid.command_args().join(" "));
        println!("{DENSE_SVF_BM_REGISTRATION} {}", params.dense.command_args().join(" "));
        Ok(())
    }
}
