//! 刀路几何：分层往复光栅、轮廓环绕与啄钻

use async_trait::async_trait;

use crate::capabilities::{Bounds, GeneratedPath, MotionKind, Move, ToolpathGeometry, ToolpathRequest};
use crate::core::ProviderError;

const SAFE_Z: f64 = 5.0;
const RETRACT_Z: f64 = 1.0;
const RAPID_MM_MIN: f64 = 5000.0;
const MAX_LEVELS: usize = 50;
const MAX_PASSES_PER_LEVEL: usize = 500;
const MAX_PECKS: usize = 200;
/// 单个特征允许的最大加工深度（mm）
const MAX_DEPTH_MM: f64 = 1000.0;

/// 刀具中心可达区域（按刀具半径内缩；区域不足一个直径时退化为中线）
struct Region {
    x0: f64,
    x1: f64,
    y0: f64,
    y1: f64,
}

impl Region {
    fn inset(bounds: &Bounds, radius: f64) -> Self {
        let axis = |lo: f64, hi: f64| {
            if hi - lo > 2.0 * radius {
                (lo + radius, hi - radius)
            } else {
                let mid = (lo + hi) / 2.0;
                (mid, mid)
            }
        };
        let (x0, x1) = axis(bounds.x_min, bounds.x_max);
        let (y0, y1) = axis(bounds.y_min, bounds.y_max);
        Self { x0, x1, y0, y1 }
    }

    fn center(&self) -> (f64, f64) {
        ((self.x0 + self.x1) / 2.0, (self.y0 + self.y1) / 2.0)
    }
}

#[derive(Debug, Clone)]
pub struct RasterGeometry {
    pub safe_z: f64,
}

impl Default for RasterGeometry {
    fn default() -> Self {
        Self { safe_z: SAFE_Z }
    }
}

/// 各层 Z 值（负数，逐层加深，最后一层恰好到底）
fn levels(total: f64, step: f64) -> Vec<f64> {
    if total <= 0.0 {
        return vec![0.0];
    }
    let step = if step.is_finite() && step > 0.0 { step } else { total };
    let count = ((total / step).ceil() as usize).clamp(1, MAX_LEVELS);
    let step = total / count as f64;
    (1..=count).map(|i| -(step * i as f64)).collect()
}

impl RasterGeometry {
    fn raster(&self, req: &ToolpathRequest, region: &Region, levels: &[f64]) -> Vec<Move> {
        let feed = req.feed_mm_min;
        let d = req.tool.diameter_mm;
        let span = region.y1 - region.y0;
        let mut stepover = if req.stepover_mm.is_finite() && req.stepover_mm > 0.0 {
            req.stepover_mm
        } else {
            0.4 * d
        };
        stepover = stepover.max(span / MAX_PASSES_PER_LEVEL as f64);
        let passes = if span > 0.0 { (span / stepover).ceil() as usize } else { 0 };

        let mut moves = vec![Move::rapid(region.x0, region.y0, self.safe_z)];
        for &z in levels {
            moves.push(Move::rapid(region.x0, region.y0, RETRACT_Z));
            moves.push(Move::feed(region.x0, region.y0, z, feed * 0.3));
            for i in 0..=passes {
                let y = (region.y0 + stepover * i as f64).min(region.y1);
                let (from, to) = if i % 2 == 0 {
                    (region.x0, region.x1)
                } else {
                    (region.x1, region.x0)
                };
                if i > 0 {
                    moves.push(Move::feed(from, y, z, feed));
                }
                moves.push(Move::feed(to, y, z, feed));
            }
            moves.push(Move::rapid(
                moves.last().map(|m| m.x).unwrap_or(region.x0),
                moves.last().map(|m| m.y).unwrap_or(region.y0),
                self.safe_z,
            ));
        }
        moves
    }

    fn contour(&self, req: &ToolpathRequest, bounds: &Bounds, levels: &[f64], outside: bool) -> Vec<Move> {
        let feed = req.feed_mm_min;
        let r = req.tool.diameter_mm / 2.0;
        let region = if outside {
            Region {
                x0: bounds.x_min - r,
                x1: bounds.x_max + r,
                y0: bounds.y_min - r,
                y1: bounds.y_max + r,
            }
        } else {
            Region::inset(bounds, r)
        };
        let corners = [
            (region.x1, region.y0),
            (region.x1, region.y1),
            (region.x0, region.y1),
            (region.x0, region.y0),
        ];

        let mut moves = vec![Move::rapid(region.x0, region.y0, self.safe_z)];
        for &z in levels {
            moves.push(Move::rapid(region.x0, region.y0, RETRACT_Z));
            moves.push(Move::feed(region.x0, region.y0, z, feed * 0.3));
            for (x, y) in corners {
                moves.push(Move::feed(x, y, z, feed));
            }
        }
        moves.push(Move::rapid(region.x0, region.y0, self.safe_z));
        moves
    }

    fn drill(&self, req: &ToolpathRequest, bounds: &Bounds, tap: bool) -> Vec<Move> {
        let feed = req.feed_mm_min;
        let (cx, cy) = Region::inset(bounds, 0.0).center();
        let bottom = bounds.z_min;
        let mut moves = vec![Move::rapid(cx, cy, self.safe_z), Move::rapid(cx, cy, RETRACT_Z)];

        if tap {
            moves.push(Move::feed(cx, cy, bottom, feed));
            moves.push(Move::feed(cx, cy, RETRACT_Z, feed));
        } else {
            let peck = req
                .tool
                .diameter_mm
                .max(0.5)
                .max(-bottom / MAX_PECKS as f64);
            let mut z = 0.0;
            while z > bottom {
                z = (z - peck).max(bottom);
                moves.push(Move::feed(cx, cy, z, feed));
                moves.push(Move::rapid(cx, cy, RETRACT_Z));
                if z > bottom {
                    moves.push(Move::rapid(cx, cy, z + 0.5));
                }
            }
        }
        moves.push(Move::rapid(cx, cy, self.safe_z));
        moves
    }
}

/// 进给段按进给速度、快移按固定快移速度估算时间（秒，保留一位小数）
pub fn estimate_time_s(moves: &[Move]) -> f64 {
    let seconds: f64 = moves
        .windows(2)
        .map(|w| {
            let (a, b) = (&w[0], &w[1]);
            let dist = ((b.x - a.x).powi(2) + (b.y - a.y).powi(2) + (b.z - a.z).powi(2)).sqrt();
            let rate = match (b.kind, b.feed) {
                (MotionKind::Feed, Some(f)) if f > 0.0 => f,
                _ => RAPID_MM_MIN,
            };
            dist / rate * 60.0
        })
        .sum();
    (seconds * 10.0).round() / 10.0
}

#[async_trait]
impl ToolpathGeometry for RasterGeometry {
    async fn generate(&self, request: &ToolpathRequest) -> Result<GeneratedPath, ProviderError> {
        let d = request.tool.diameter_mm;
        if !(d.is_finite() && d > 0.0) {
            return Err(ProviderError::InvalidInput(format!(
                "tool {} has no usable diameter",
                request.tool.id
            )));
        }
        if !(request.feed_mm_min.is_finite() && request.feed_mm_min > 0.0) {
            return Err(ProviderError::InvalidInput(format!(
                "feed {} mm/min is not positive",
                request.feed_mm_min
            )));
        }

        let bounds = &request.bounds;
        let depth = -bounds.z_min;
        if !depth.is_finite() || depth > MAX_DEPTH_MM {
            return Err(ProviderError::InvalidInput(format!(
                "feature {} depth {depth} mm is outside 0..={MAX_DEPTH_MM} mm",
                request.feature.id
            )));
        }
        let strategy = request.strategy.to_lowercase();
        let moves = if strategy.contains("tap") {
            self.drill(request, bounds, true)
        } else if strategy.contains("drill") {
            self.drill(request, bounds, false)
        } else {
            let levels = levels(-bounds.z_min, request.depth_mm);
            if strategy.contains("contour") || strategy.contains("chamfer") {
                self.contour(request, bounds, &levels, strategy.contains("outside"))
            } else {
                self.raster(request, &Region::inset(bounds, d / 2.0), &levels)
            }
        };

        Ok(GeneratedPath {
            estimated_time_s: estimate_time_s(&moves),
            moves,
        })
    }
}
