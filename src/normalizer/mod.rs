//! 规范化模块：按表批量执行覆盖规则
pub mod normalizer;

pub use self::normalizer::RecordNormalizer;
