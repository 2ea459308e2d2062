//! 命令行参数

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(
    name = "projectmind",
    version,
    about = "拆解需求为子任务、按需加载技能并汇总回答；事件以 JSON 行输出到 stdout"
)]
pub struct Cli {
    /// 会话 id；同一会话共享历史与子任务记忆
    #[arg(long, env = "PM_SESSION", default_value = "default")]
    pub session: String,

    /// 额外的配置文件，覆盖 config/default.toml
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// 需求文本（多个词以空格拼接）
    #[arg(required = true, num_args = 1..)]
    pub request: Vec<String>,
}

impl Cli {
    pub fn request_text(&self) -> String {
        self.request.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_session_config_and_words() {
        let cli = Cli::try_parse_from([
            "projectmind",
            "--session",
            "s1",
            "--config",
            "pm.toml",
            "写一首",
            "春天的诗",
        ])
        .unwrap();
        assert_eq!(cli.session, "s1");
        assert_eq!(cli.config, Some(PathBuf::from("pm.toml")));
        assert_eq!(cli.request_text(), "写一首 春天的诗");
    }

    #[test]
    fn test_request_is_required() {
        assert!(Cli::try_parse_from(["projectmind", "--session", "s1"]).is_err());
    }
}
