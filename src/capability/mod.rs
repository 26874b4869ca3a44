//! 外部能力：文本生成、文件/搜索、报告渲染，以及模型输出的统一归一化

pub mod normalize;
pub mod render;
pub mod resource;
pub mod text;

pub use render::{render_data, RenderData, ReportRenderer};
pub use resource::{ResourceProvider, WorkspaceResources};
pub use text::{phase_of, phase_system, TextGenerator};
