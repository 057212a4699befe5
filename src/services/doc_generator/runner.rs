//! 文档生成调度
//!
//! 按任务计划并发生成文档：依赖全部结束后才启动任务，
//! 每个任务完成后写入断点，进度通过 broadcast 通道发布

use chrono::Local;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::generator::{GenerationRequest, GeneratorError, TextGenerator};
use crate::config::AppConfig;
use crate::error::AppResult;
use crate::services::code_analyzer::{RepoScanner, TextualReferenceFinder};
use crate::services::doc_meta::{need_to_generate, ItemId, ItemStatus, MetaInfo, ReferenceFinder, TaskInfo};

/// 运行进度事件
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum RunnerEvent {
    #[serde(rename = "run_started")]
    RunStarted { run_id: String, total: usize },
    #[serde(rename = "task_started")]
    TaskStarted { task_id: usize, full_name: String },
    #[serde(rename = "task_completed")]
    TaskCompleted { task_id: usize, full_name: String },
    #[serde(rename = "task_failed")]
    TaskFailed {
        task_id: usize,
        full_name: String,
        message: String,
    },
    #[serde(rename = "run_finished")]
    RunFinished { run_id: String, summary: RunSummary },
}

/// 一次运行的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub generated: usize,
    pub failed: usize,
}

/// 文档生成调度器
pub struct DocRunner {
    config: AppConfig,
    meta: Arc<Mutex<MetaInfo>>,
    /// 上一版本的元信息，引用关系重新计算后用于比较引用者
    older_meta: Option<MetaInfo>,
    generator: Arc<dyn TextGenerator>,
    progress_tx: broadcast::Sender<RunnerEvent>,
}

impl DocRunner {
    /// 加载断点或扫描仓库，创建调度器
    pub fn new(config: AppConfig, generator: Arc<dyn TextGenerator>) -> AppResult<Self> {
        let repo = config.project.target_repo.clone();
        let checkpoint_dir = config.project.checkpoint_dir();
        let scanner = RepoScanner::new(&repo, &[]);

        let (meta, older_meta) = if checkpoint_dir.exists() {
            // 旧版本不按磁盘过滤，已删除文件中的节点才能记入 deleted_items_from_older_meta
            let older = MetaInfo::from_checkpoint_path(&checkpoint_dir, None)?;
            if older.in_generation_process {
                info!("Resuming interrupted generation from {}", checkpoint_dir.display());
                let resumed = MetaInfo::from_checkpoint_path(&checkpoint_dir, Some(&repo))?;
                (resumed, None)
            } else {
                let mut meta = MetaInfo::init_meta_info(
                    &scanner,
                    older.fake_file_reflection.clone(),
                    older.jump_files.clone(),
                )?;
                meta.load_doc_from_older_meta(&older);
                (meta, Some(older))
            }
        } else {
            let meta = MetaInfo::init_meta_info(&scanner, BTreeMap::new(), Vec::new())?;
            meta.checkpoint(&checkpoint_dir, false)?;
            (meta, None)
        };

        Ok(Self::from_meta(config, meta, older_meta, generator))
    }

    /// 使用已构建的元信息创建调度器
    pub fn from_meta(
        config: AppConfig,
        meta: MetaInfo,
        older_meta: Option<MetaInfo>,
        generator: Arc<dyn TextGenerator>,
    ) -> Self {
        let (progress_tx, _) = broadcast::channel(100);
        Self {
            config,
            meta: Arc::new(Mutex::new(meta)),
            older_meta,
            generator,
            progress_tx,
        }
    }

    /// 订阅进度事件
    pub fn subscribe(&self) -> broadcast::Receiver<RunnerEvent> {
        self.progress_tx.subscribe()
    }

    /// 共享的元信息
    pub fn meta(&self) -> Arc<Mutex<MetaInfo>> {
        Arc::clone(&self.meta)
    }

    fn checkpoint_dir(&self) -> PathBuf {
        self.config.project.checkpoint_dir()
    }

    /// 使用文本引用解析器运行
    pub async fn run(&mut self) -> AppResult<RunSummary> {
        let scanner = RepoScanner::new(&self.config.project.target_repo, &[]);
        let finder = TextualReferenceFinder::from_repo(&scanner)?;
        self.first_generate(&finder).await
    }

    /// 重新计算引用关系，按任务计划生成所有需要更新的文档
    pub async fn first_generate<F: ReferenceFinder + ?Sized>(&mut self, finder: &F) -> AppResult<RunSummary> {
        let run_id = Uuid::new_v4().to_string();
        let checkpoint_dir = self.checkpoint_dir();
        let ignore_list = self.config.project.ignore_list.clone();

        let tasks = {
            let mut meta = self.meta.lock();
            let reference_count = meta.parse_reference(finder);
            info!("Parsed {} references", reference_count);
            if let Some(older) = self.older_meta.take() {
                meta.mark_referencer_changes(&older);
            }
            let plan = meta.get_task_manager(|tree, id| need_to_generate(tree, id, &ignore_list));
            info!("Task plan ({} tasks):\n{}", plan.len(), plan.render_table());
            meta.in_generation_process = true;
            meta.checkpoint(&checkpoint_dir, false)?;
            plan.tasks
        };

        let total = tasks.len();
        info!("Run {} started: {} tasks", run_id, total);
        let _ = self.progress_tx.send(RunnerEvent::RunStarted {
            run_id: run_id.clone(),
            total,
        });

        let (generated, failed) = self.execute(tasks).await;
        let summary = RunSummary {
            total,
            generated,
            failed,
        };

        {
            let mut meta = self.meta.lock();
            meta.in_generation_process = false;
            meta.document_version = self
                .config
                .project
                .document_version
                .clone()
                .unwrap_or_else(|| Local::now().format("%Y-%m-%d %H:%M:%S").to_string());
            meta.checkpoint(&checkpoint_dir, true)?;
        }

        info!(
            "Run {} finished: generated={}, failed={}, total={}",
            run_id, summary.generated, summary.failed, summary.total
        );
        let _ = self.progress_tx.send(RunnerEvent::RunFinished { run_id, summary });
        Ok(summary)
    }

    /// 并发执行任务，依赖全部结束（成功或失败）后才启动
    async fn execute(&self, mut pending: BTreeMap<usize, TaskInfo>) -> (usize, usize) {
        let concurrency = self.config.project.thread_count();
        let checkpoint_dir = self.checkpoint_dir();
        let mut finished: HashSet<usize> = HashSet::new();
        let mut in_flight = FuturesUnordered::new();
        let (mut generated, mut failed) = (0, 0);

        loop {
            let ready: BTreeSet<usize> = pending
                .iter()
                .filter(|(_, task)| task.dependencies.iter().all(|dep| finished.contains(dep)))
                .map(|(&task_id, _)| task_id)
                .take(concurrency.saturating_sub(in_flight.len()))
                .collect();

            for task_id in ready {
                let Some(task) = pending.remove(&task_id) else {
                    continue;
                };
                let request = GenerationRequest::from_tree(&self.meta.lock().tree, task.item);
                info!("Task {} started: {}", task_id, task.full_name);
                let _ = self.progress_tx.send(RunnerEvent::TaskStarted {
                    task_id,
                    full_name: task.full_name.clone(),
                });
                in_flight.push(run_task(Arc::clone(&self.generator), task_id, task.item, request));
            }

            let Some((task_id, item, result)) = in_flight.next().await else {
                if !pending.is_empty() {
                    warn!("{} tasks left with unfinished dependencies", pending.len());
                }
                break;
            };
            finished.insert(task_id);

            let full_name = self.meta.lock().tree.full_name(item);
            match result {
                Ok(doc) => {
                    generated += 1;
                    self.save_doc(item, doc, &checkpoint_dir);
                    info!("Task {} completed: {}", task_id, full_name);
                    let _ = self
                        .progress_tx
                        .send(RunnerEvent::TaskCompleted { task_id, full_name });
                }
                Err(e) => {
                    failed += 1;
                    error!("Task {} failed: {}: {}", task_id, full_name, e);
                    let _ = self.progress_tx.send(RunnerEvent::TaskFailed {
                        task_id,
                        full_name,
                        message: e.to_string(),
                    });
                }
            }
        }

        (generated, failed)
    }

    fn save_doc(&self, item: ItemId, doc: String, checkpoint_dir: &Path) {
        let mut meta = self.meta.lock();
        let node = meta.tree.get_mut(item);
        node.md_content.push(doc);
        node.status = ItemStatus::UpToDate;
        if let Err(e) = meta.checkpoint(checkpoint_dir, false) {
            error!("Failed to write checkpoint: {}", e);
        }
    }
}

fn run_task(
    generator: Arc<dyn TextGenerator>,
    task_id: usize,
    item: ItemId,
    request: GenerationRequest,
) -> impl Future<Output = (usize, ItemId, Result<String, GeneratorError>)> {
    async move {
        let result = generator.generate(&request).await;
        (task_id, item, result)
    }
}
