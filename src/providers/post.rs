//! 控制器方言后处理：fanuc / haas / grbl / linuxcnc

use async_trait::async_trait;

use crate::capabilities::{PostOptions, PostOutput, PostProcessor, Toolpath};
use crate::core::ProviderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dialect {
    Fanuc,
    Haas,
    Grbl,
    LinuxCnc,
}

impl Dialect {
    fn parse(controller: &str) -> Option<Self> {
        match controller.trim().to_lowercase().as_str() {
            "fanuc" => Some(Dialect::Fanuc),
            "haas" => Some(Dialect::Haas),
            "grbl" => Some(Dialect::Grbl),
            "linuxcnc" | "emc2" => Some(Dialect::LinuxCnc),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Dialect::Fanuc => "fanuc",
            Dialect::Haas => "haas",
            Dialect::Grbl => "grbl",
            Dialect::LinuxCnc => "linuxcnc",
        }
    }

    /// 是否支持换刀与刀长补偿
    fn tool_changer(self) -> bool {
        self != Dialect::Grbl
    }
}

/// 程序名只保留控制器注释可接受的字符
fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ' '))
        .collect::<String>()
        .to_uppercase();
    if cleaned.trim().is_empty() {
        "PROGRAM".to_string()
    } else {
        cleaned.trim().to_string()
    }
}

#[derive(Debug, Default)]
pub struct DialectPostProcessor;

impl DialectPostProcessor {
    fn header(dialect: Dialect, options: &PostOptions) -> Vec<String> {
        let name = sanitize(&options.program_name);
        match dialect {
            Dialect::Fanuc => vec![
                "%".to_string(),
                format!("O1000 ({name})"),
                "G21 G17 G40 G49 G80 G90".to_string(),
            ],
            Dialect::Haas => vec![
                "%".to_string(),
                format!("O01000 ({name})"),
                "G21 G17 G40 G49 G80 G90 G54".to_string(),
            ],
            Dialect::Grbl => vec![format!("({name})"), "G21 G17 G90 G94".to_string()],
            Dialect::LinuxCnc => vec![format!("({name})"), "G21 G17 G90 G64 P0.01".to_string()],
        }
    }

    fn footer(dialect: Dialect) -> Vec<String> {
        match dialect {
            Dialect::Fanuc => vec!["G28 G91 Z0".to_string(), "G90".to_string(), "M30".to_string(), "%".to_string()],
            Dialect::Haas => vec!["G53 G0 Z0".to_string(), "M30".to_string(), "%".to_string()],
            Dialect::Grbl => vec!["M2".to_string()],
            Dialect::LinuxCnc => vec!["M2".to_string()],
        }
    }
}

#[async_trait]
impl PostProcessor for DialectPostProcessor {
    fn supports(&self, controller: &str) -> bool {
        Dialect::parse(controller).is_some()
    }

    async fn emit(
        &self,
        toolpaths: &[Toolpath],
        controller: &str,
        options: &PostOptions,
    ) -> Result<PostOutput, ProviderError> {
        let dialect = Dialect::parse(controller)
            .ok_or_else(|| ProviderError::Unsupported(format!("controller {controller}")))?;

        let mut gcode = Self::header(dialect, options);
        let mut tool_numbers: Vec<&str> = Vec::new();
        let mut reasoning = vec![format!("{} dialect, {} toolpaths", dialect.name(), toolpaths.len())];

        for path in toolpaths {
            let number = match tool_numbers.iter().position(|t| *t == path.tool_id) {
                Some(i) => i + 1,
                None => {
                    tool_numbers.push(&path.tool_id);
                    tool_numbers.len()
                }
            };
            gcode.push(format!("({} / {} / {})", path.feature_id, path.tool_id, path.strategy));
            if dialect.tool_changer() {
                gcode.push(format!("T{number} M6"));
                gcode.push(format!("G43 H{number}"));
            } else {
                gcode.push(format!("(load tool {} and press cycle start)", path.tool_id));
                gcode.push("M0".to_string());
            }
            gcode.push(format!("S{:.0} M3", path.rpm));
            if options.coolant {
                gcode.push("M8".to_string());
            }
            gcode.extend(path.moves.iter().map(|m| m.to_gcode()));
            gcode.push("M5".to_string());
            if options.coolant {
                gcode.push("M9".to_string());
            }
        }
        gcode.extend(Self::footer(dialect));

        if !dialect.tool_changer() && tool_numbers.len() > 1 {
            reasoning.push(format!(
                "{} manual tool changes inserted as M0 pauses",
                tool_numbers.len()
            ));
        }
        let confidence = if dialect == Dialect::Grbl { 85 } else { 90 };

        Ok(PostOutput {
            gcode,
            controller: dialect.name().to_string(),
            confidence,
            reasoning,
        })
    }
}
