//! Record normalizer core module
//! 记录规范化器
//! 核心职责：
//! 1. 加载系统/用户规则表并构建匹配器
//! 2. 按表对记录批量执行规则（可分片并行）
//! 3. 按配置收集规则日志

use std::sync::Arc;
use std::thread;
use std::time::Instant;

use log::debug;
use themetrack_engine::{
    BatchSummary, Evaluator, IndexedMatcher, NaiveMatcher, Record, RuleMatcher, RuleSet, RuleTrace,
};

use crate::config::{MatcherStrategy, NormalizerConfig};
use crate::error::TtResult;
use crate::record::RecordTable;
use crate::rule::RuleLoader;

/// 按匹配策略选定的求值器
#[derive(Debug, Clone)]
enum Engine {
    Indexed(Evaluator<IndexedMatcher>),
    Naive(Evaluator<NaiveMatcher>),
}

/// 记录规范化器
/// - 规则集 Arc 共享，克隆规范化器不复制规则
/// - 求值器只读，可跨线程共享
#[derive(Debug, Clone)]
pub struct RecordNormalizer {
    system: Arc<RuleSet>,
    user: Arc<RuleSet>,
    engine: Engine,
    config: NormalizerConfig,
}

impl RecordNormalizer {
    /// 按配置加载规则文件并创建规范化器
    pub fn new(config: NormalizerConfig) -> TtResult<Self> {
        config.validate()?;
        let (system, user) = RuleLoader::load_config(&config)?;
        Self::with_rules(system, user, config)
    }

    /// 使用内存中的规则集创建规范化器（配置中的规则路径被忽略）
    pub fn with_rules(system: RuleSet, user: RuleSet, config: NormalizerConfig) -> TtResult<Self> {
        let system = Arc::new(system);
        let user = Arc::new(user);

        let start = Instant::now();
        let engine = match config.strategy {
            MatcherStrategy::Indexed => Engine::Indexed(Evaluator::indexed(system.clone(), user.clone())?),
            MatcherStrategy::Naive => Engine::Naive(Evaluator::naive(system.clone(), user.clone())?),
        };
        debug!(
            "Normalizer ready ({:?}): {} system rules, {} user rules, built in {:?}",
            config.strategy,
            system.len(),
            user.len(),
            start.elapsed()
        );

        Ok(Self {
            system,
            user,
            engine,
            config,
        })
    }

    pub fn system_rules(&self) -> &RuleSet {
        &self.system
    }

    pub fn user_rules(&self) -> &RuleSet {
        &self.user
    }

    pub fn config(&self) -> &NormalizerConfig {
        &self.config
    }

    /// 按配置创建规则日志：配置了 trace 时开启并按表/行过滤，否则关闭
    pub fn new_trace(&self) -> RuleTrace {
        match self.config.trace_filter() {
            Some(filter) => RuleTrace::new(filter),
            None => RuleTrace::disabled(),
        }
    }

    /// 顺序处理一张表的记录，table 写入规则日志上下文
    pub fn normalize(&self, table: &str, records: &mut [Record], trace: &mut RuleTrace) -> BatchSummary {
        self.normalize_chunk(table, records, 0, trace)
    }

    /// 分片并行处理；线程数来自配置，结果与顺序处理一致
    pub fn normalize_parallel(
        &self,
        table: &str,
        records: &mut [Record],
        trace: &mut RuleTrace,
    ) -> BatchSummary {
        let threads = self.config.effective_threads().min(records.len());
        if threads <= 1 {
            return self.normalize(table, records, trace);
        }

        let chunk_size = records.len().div_ceil(threads);
        let start = Instant::now();
        let parts: Vec<(BatchSummary, RuleTrace)> = thread::scope(|scope| {
            let handles: Vec<_> = records
                .chunks_mut(chunk_size)
                .enumerate()
                .map(|(idx, chunk)| {
                    let mut part_trace = trace.fork();
                    scope.spawn(move || {
                        let summary =
                            self.normalize_chunk(table, chunk, idx * chunk_size, &mut part_trace);
                        (summary, part_trace)
                    })
                })
                .collect();

            handles
                .into_iter()
                .map(|handle| handle.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
                .collect()
        });

        // 分片按顺序合并，日志保持记录顺序
        let mut summary = BatchSummary::default();
        for (part_summary, part_trace) in parts {
            summary.merge(part_summary);
            trace.absorb(part_trace);
        }
        debug!(
            "Normalized '{}' on {} threads: {} records in {:?}",
            table,
            threads,
            summary.records,
            start.elapsed()
        );
        summary
    }

    /// 处理整张记录表
    pub fn normalize_table(&self, name: &str, table: &mut RecordTable, trace: &mut RuleTrace) -> BatchSummary {
        self.normalize_parallel(name, table.records_mut(), trace)
    }

    fn normalize_chunk(
        &self,
        table: &str,
        records: &mut [Record],
        first_index: usize,
        trace: &mut RuleTrace,
    ) -> BatchSummary {
        trace.with_context(
            || vec![("table", table.to_string())],
            |trace| match &self.engine {
                Engine::Indexed(evaluator) => run_chunk(evaluator, records, first_index, trace),
                Engine::Naive(evaluator) => run_chunk(evaluator, records, first_index, trace),
            },
        )
    }
}

fn run_chunk<M: RuleMatcher>(
    evaluator: &Evaluator<M>,
    records: &mut [Record],
    first_index: usize,
    trace: &mut RuleTrace,
) -> BatchSummary {
    evaluator.run_batch_from(records, first_index, trace)
}
