//! 阶段 7：校验
//!
//! 机床限制/参数检查与毛坯包容检查分别委托给两个 provider。硬性错误只降低置信度，不中断流水线。
//! 置信度上限：约束校验器缺席 70，包容校验器缺席 80，有软警告 90，
//! 有硬错误 validation_error_confidence。

use async_trait::async_trait;

use super::{StageExecutor, StageInput, StageRecorder};
use crate::capabilities::{
    Capability, ConstraintsInput, ConstraintsValidator, ContainmentOptions, ContainmentValidator,
    Toolpath,
};
use crate::core::WorkflowError;
use crate::workflow::{StageName, StageOutcome, StageResult, ToolpathPlan, ValidationSummary};

const CONSTRAINTS_ABSENT_CAP: u8 = 70;
const CONTAINMENT_ABSENT_CAP: u8 = 80;
const SOFT_WARNING_CAP: u8 = 90;

pub struct Validation;

#[async_trait]
impl StageExecutor for Validation {
    fn stage(&self) -> StageName {
        StageName::Validation
    }

    async fn execute(&self, input: StageInput<'_>) -> Result<StageOutcome, WorkflowError> {
        let mut rec = StageRecorder::start(self.stage());
        let ctx = input.context;
        let mut confidence: u8 = 100;
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let mut adjusted = Vec::new();
        let mut toolpaths = ctx.toolpaths.clone();

        let generated: Vec<Toolpath> = toolpaths
            .iter()
            .filter_map(|p| p.generated().cloned())
            .collect();

        match input.registry.resolve::<dyn ConstraintsValidator>() {
            Some(validator) => {
                let report = input
                    .caller
                    .call(
                        Capability::ConstraintsValidator,
                        validator.validate(&ConstraintsInput {
                            parameters: ctx.parameters.clone(),
                            toolpaths: generated.clone(),
                            tools: ctx.tools.clone(),
                            machine: input.request.machine_name().map(str::to_string),
                        }),
                    )
                    .await?;
                rec.note_data(
                    "check machine constraints",
                    if report.valid {
                        "parameters and toolpaths within machine limits".to_string()
                    } else {
                        format!("{} constraint violation(s)", report.errors.len())
                    },
                    serde_json::json!({
                        "machine": input.request.machine_name(),
                        "errors": report.errors.len(),
                        "warnings": report.warnings.len(),
                    }),
                );
                errors.extend(report.errors);
                warnings.extend(report.warnings);
            }
            None => {
                rec.fallback(
                    "skip constraint checks",
                    "ConstraintsValidator absent; machine limits not verified",
                );
                confidence = confidence.min(CONSTRAINTS_ABSENT_CAP);
            }
        }

        let stock = input.request.stock.as_ref().filter(|s| s.is_valid());
        match (input.registry.resolve::<dyn ContainmentValidator>(), stock) {
            (None, _) => {
                rec.fallback(
                    "skip containment checks",
                    "ContainmentValidator absent; stock fit not verified",
                );
                confidence = confidence.min(CONTAINMENT_ABSENT_CAP);
            }
            (Some(_), None) => rec.note(
                "check containment",
                "no usable stock supplied; containment check skipped",
            ),
            (Some(validator), Some(stock)) => {
                let options = ContainmentOptions {
                    auto_adjust: input.options.auto_adjust_containment
                        && validator.supports_auto_adjust(),
                };
                for path in &generated {
                    let report = input
                        .caller
                        .call(
                            Capability::ContainmentValidator,
                            validator.validate(path, stock, &options),
                        )
                        .await?;
                    if report.valid {
                        rec.note(
                            format!("check containment for {}", path.feature_id),
                            "toolpath stays inside stock",
                        );
                        continue;
                    }
                    match report.adjusted_path {
                        Some(adjusted_path) if options.auto_adjust => {
                            rec.note_data(
                                format!("adjust toolpath for {}", path.feature_id),
                                "containment validator supplied an adjusted toolpath; substituted",
                                serde_json::json!({ "violations": report.violations }),
                            );
                            warnings.push(format!(
                                "toolpath for {} adjusted to fit stock",
                                path.feature_id
                            ));
                            replace_path(&mut toolpaths, adjusted_path);
                            adjusted.push(path.feature_id.clone());
                        }
                        _ => errors.extend(
                            report
                                .violations
                                .into_iter()
                                .map(|v| format!("{}: {v}", path.feature_id)),
                        ),
                    }
                }
            }
        }

        if generated.is_empty() {
            rec.note("validate toolpaths", "no generated toolpaths to validate");
        }
        if !warnings.is_empty() {
            confidence = confidence.min(SOFT_WARNING_CAP);
        }
        if !errors.is_empty() {
            confidence = confidence.min(input.config.workflow.validation_error_confidence);
        }
        for warning in &warnings {
            rec.warn(warning.clone());
        }
        for error in &errors {
            rec.error(error.clone());
        }

        let summary = ValidationSummary {
            valid: errors.is_empty(),
            errors,
            warnings,
            adjusted,
            toolpaths,
        };
        Ok(rec.finish(confidence, StageResult::Validation(summary)))
    }
}

fn replace_path(toolpaths: &mut [ToolpathPlan], path: Toolpath) {
    if let Some(slot) = toolpaths
        .iter_mut()
        .find(|p| p.feature_id() == path.feature_id)
    {
        *slot = ToolpathPlan::Generated(path);
    }
}
