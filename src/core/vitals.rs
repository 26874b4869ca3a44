//! 生命体征：mood（信心）、focus（一致性）、stamina（体力）
//!
//! 每次阶段结束后按固定规则更新：新值 = (1 - w) * 旧值 + w * 观测值，
//! 单个糟糕阶段既不能让体征瞬间归零，也不能瞬间恢复。

use serde::{Deserialize, Serialize};

use crate::config::VitalsSection;

/// 三个 [0, 1] 区间内的体征
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Vitals {
    pub mood: f64,
    pub focus: f64,
    pub stamina: f64,
}

/// 阶段结束后喂给 Vitals 的观测
#[derive(Clone, Copy, Debug)]
pub enum VitalSignal {
    Plan {
        confidence: f64,
    },
    Gather {
        fetched: usize,
        gaps: usize,
    },
    Execute {
        success: bool,
        errors: usize,
    },
    Evaluate {
        quality: f64,
        plan_confidence: f64,
        output_chars: usize,
    },
    Respond {
        complete: bool,
    },
}

impl Default for Vitals {
    fn default() -> Self {
        Self::from_config(&VitalsSection::default())
    }
}

fn clamp01(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

fn blend(prev: f64, observed: f64, weight: f64) -> f64 {
    let w = clamp01(weight);
    clamp01((1.0 - w) * prev + w * clamp01(observed))
}

impl Vitals {
    pub fn new(mood: f64, focus: f64, stamina: f64) -> Self {
        Self {
            mood: clamp01(mood),
            focus: clamp01(focus),
            stamina: clamp01(stamina),
        }
    }

    pub fn from_config(cfg: &VitalsSection) -> Self {
        Self::new(cfg.initial_mood, cfg.initial_focus, cfg.initial_stamina)
    }

    /// 按阶段观测更新体征（只做混合，不做覆盖）
    pub fn observe(&mut self, signal: VitalSignal, cfg: &VitalsSection) {
        let w = cfg.blend_weight;
        match signal {
            VitalSignal::Plan { confidence } => {
                self.mood = blend(self.mood, confidence, w);
            }
            VitalSignal::Gather { fetched, gaps } => {
                let total = fetched + gaps;
                if total > 0 {
                    let coverage = fetched as f64 / total as f64;
                    self.focus = blend(self.focus, coverage, w);
                }
            }
            VitalSignal::Execute { success, errors } => {
                let errs = errors.min(3) as f64;
                let observed_focus = if success && errors == 0 {
                    1.0
                } else {
                    self.focus - 0.25 * errs.max(1.0)
                };
                self.focus = blend(self.focus, observed_focus, w);
                self.stamina = blend(self.stamina, self.stamina - cfg.error_decay * errs, w);
            }
            VitalSignal::Evaluate {
                quality,
                plan_confidence,
                output_chars,
            } => {
                self.mood = blend(self.mood, quality, w);
                // 计划信心与评估质量严重背离视为推理不一致
                if (plan_confidence - quality).abs() > 0.5 {
                    self.focus = blend(self.focus, self.focus - 0.3, w);
                }
                // 没有任何产出视为无进展，体力加倍消耗
                let decay = if output_chars == 0 {
                    cfg.loop_decay * 2.0
                } else {
                    cfg.loop_decay
                };
                self.stamina = blend(self.stamina, self.stamina - decay, w);
            }
            VitalSignal::Respond { complete } => {
                let observed = if complete { 1.0 } else { 0.4 };
                self.mood = blend(self.mood, observed, w);
            }
        }
    }

    pub fn as_array(&self) -> [(&'static str, f64); 3] {
        [
            ("mood", self.mood),
            ("focus", self.focus),
            ("stamina", self.stamina),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> VitalsSection {
        VitalsSection::default()
    }

    #[test]
    fn test_single_bad_phase_cannot_crash_to_zero() {
        let mut v = Vitals::new(1.0, 1.0, 1.0);
        v.observe(VitalSignal::Plan { confidence: 0.0 }, &cfg());
        assert!((v.mood - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_single_good_phase_cannot_heal_instantly() {
        let mut v = Vitals::new(0.0, 0.5, 0.5);
        v.observe(
            VitalSignal::Evaluate {
                quality: 1.0,
                plan_confidence: 1.0,
                output_chars: 100,
            },
            &cfg(),
        );
        assert!(v.mood < 0.5);
    }

    #[test]
    fn test_stamina_decays_per_loop() {
        let mut v = Vitals::default();
        let before = v.stamina;
        v.observe(
            VitalSignal::Evaluate {
                quality: 0.5,
                plan_confidence: 0.5,
                output_chars: 10,
            },
            &cfg(),
        );
        assert!((before - v.stamina - 0.04).abs() < 1e-9);
    }

    #[test]
    fn test_errors_reduce_focus_and_stamina() {
        let mut v = Vitals::default();
        let before = v;
        v.observe(
            VitalSignal::Execute {
                success: false,
                errors: 2,
            },
            &cfg(),
        );
        assert!(v.focus < before.focus);
        assert!(v.stamina < before.stamina);
    }

    #[test]
    fn test_values_stay_bounded() {
        let mut v = Vitals::new(0.01, 0.01, 0.01);
        for _ in 0..20 {
            v.observe(
                VitalSignal::Execute {
                    success: false,
                    errors: 10,
                },
                &cfg(),
            );
        }
        for (_, value) in v.as_array() {
            assert!((0.0..=1.0).contains(&value));
        }
        assert_eq!(Vitals::new(2.0, -1.0, f64::NAN), Vitals::new(1.0, 0.0, 0.0));
    }
}
