//! Message templates and rendering.

pub mod model;
pub mod render;
pub mod seed;

pub use model::{Template, TemplateInput, default_templates};
pub use render::{RenderedEmail, render, render_template};
pub use seed::seed_default_templates;
