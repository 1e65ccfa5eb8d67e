//! 阶段 8：程序输出

use async_trait::async_trait;

use super::{StageExecutor, StageInput, StageRecorder};
use crate::capabilities::{Capability, PostOptions, PostProcessor, Toolpath};
use crate::core::WorkflowError;
use crate::workflow::{EmittedProgram, StageName, StageOutcome, StageResult};

const GENERIC_CONFIDENCE: u8 = 50;
const DEFAULT_PROGRAM_NAME: &str = "MILLWRIGHT";

pub struct OutputGeneration;

#[async_trait]
impl StageExecutor for OutputGeneration {
    fn stage(&self) -> StageName {
        StageName::OutputGeneration
    }

    async fn execute(&self, input: StageInput<'_>) -> Result<StageOutcome, WorkflowError> {
        let mut rec = StageRecorder::start(self.stage());
        let controller = input
            .options
            .controller
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(input.config.workflow.default_controller.as_str())
            .to_lowercase();
        let post_options = PostOptions {
            program_name: input
                .options
                .program_name
                .clone()
                .unwrap_or_else(|| DEFAULT_PROGRAM_NAME.to_string()),
            coolant: input.options.coolant,
        };
        let toolpaths: Vec<Toolpath> = input
            .context
            .toolpaths
            .iter()
            .filter_map(|p| p.generated().cloned())
            .collect();
        if toolpaths.is_empty() {
            rec.note("collect toolpaths", "no generated toolpaths; program has no motion");
        }

        let post = input
            .registry
            .resolve::<dyn PostProcessor>()
            .filter(|p| p.supports(&controller));
        let program = match post {
            Some(post) => {
                let out = input
                    .caller
                    .call(
                        Capability::PostProcessor,
                        post.emit(&toolpaths, &controller, &post_options),
                    )
                    .await?;
                rec.note_data(
                    "post-process",
                    format!("{} lines for {}", out.gcode.len(), out.controller),
                    serde_json::json!({ "reasoning": out.reasoning }),
                );
                EmittedProgram {
                    controller: out.controller,
                    gcode: out.gcode,
                    confidence: out.confidence.min(100),
                    reduced_fidelity: false,
                }
            }
            None => {
                let why = if input.registry.is_present(Capability::PostProcessor) {
                    format!("PostProcessor does not support \"{controller}\"")
                } else {
                    "PostProcessor absent".to_string()
                };
                rec.fallback("generic program", format!("{why}; emitting minimal G0/G1 program"));
                rec.warn(format!(
                    "no post processor for {controller}; emitted generic reduced-fidelity program"
                ));
                EmittedProgram {
                    controller: "generic".to_string(),
                    gcode: generic_program(&toolpaths, &post_options),
                    confidence: GENERIC_CONFIDENCE,
                    reduced_fidelity: true,
                }
            }
        };

        let confidence = program.confidence;
        Ok(rec.finish(confidence, StageResult::OutputGeneration(program)))
    }
}

/// 与方言无关的最小指令集：仅 G0/G1、主轴与冷却开关
pub fn generic_program(toolpaths: &[Toolpath], options: &PostOptions) -> Vec<String> {
    let mut lines = vec![
        format!("({})", options.program_name.to_uppercase()),
        "(GENERIC OUTPUT - REDUCED FIDELITY - VERIFY BEFORE RUNNING)".to_string(),
        "G21".to_string(),
        "G90".to_string(),
        "G17".to_string(),
    ];
    for path in toolpaths {
        lines.push(format!(
            "(FEATURE {} TOOL {} STRATEGY {})",
            path.feature_id, path.tool_id, path.strategy
        ));
        lines.push(format!("M3 S{:.0}", path.rpm));
        if options.coolant {
            lines.push("M8".to_string());
        }
        lines.extend(path.moves.iter().map(|m| m.to_gcode()));
        lines.push("M5".to_string());
    }
    if options.coolant && !toolpaths.is_empty() {
        lines.push("M9".to_string());
    }
    lines.push("M30".to_string());
    lines
}
