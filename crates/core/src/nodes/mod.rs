pub mod blank_clip;
pub mod extract_frequency;
pub mod replace_frequency;
pub mod y4m_source;
