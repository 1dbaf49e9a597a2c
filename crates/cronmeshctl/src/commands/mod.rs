pub mod groups;
pub mod publish;
