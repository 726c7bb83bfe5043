// 该文件是 Xiyi （洗衣计数） 项目的一部分。
// src/worker.rs - 只保留最新帧的单线程检测工作器
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::{
  sync::{
    Arc, Condvar, Mutex, MutexGuard, PoisonError,
    atomic::{AtomicU64, Ordering},
    mpsc::{self, Receiver, Sender},
  },
  thread::{self, JoinHandle},
};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::model::Model;

const WORKER_THREAD_NAME: &str = "detect-worker";

/// 容量为 1 的槽位：新放入的元素覆盖尚未取走的旧元素
#[derive(Debug)]
pub struct LatestSlot<T> {
  state: Mutex<SlotState<T>>,
  ready: Condvar,
}

#[derive(Debug)]
struct SlotState<T> {
  pending: Option<T>,
  closed: bool,
}

impl<T> Default for LatestSlot<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T> LatestSlot<T> {
  pub fn new() -> Self {
    Self {
      state: Mutex::new(SlotState {
        pending: None,
        closed: false,
      }),
      ready: Condvar::new(),
    }
  }

  fn lock(&self) -> MutexGuard<'_, SlotState<T>> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// 放入新元素。关闭后返回 `Err(item)`；否则返回被覆盖的旧元素（如果有）
  pub fn offer(&self, item: T) -> Result<Option<T>, T> {
    let mut state = self.lock();
    if state.closed {
      return Err(item);
    }
    let superseded = state.pending.replace(item);
    drop(state);
    self.ready.notify_one();
    Ok(superseded)
  }

  /// 阻塞直到有元素可取；关闭且没有待处理元素时返回 `None`
  pub fn take(&self) -> Option<T> {
    let mut state = self.lock();
    loop {
      if let Some(item) = state.pending.take() {
        return Some(item);
      }
      if state.closed {
        return None;
      }
      state = self
        .ready
        .wait(state)
        .unwrap_or_else(PoisonError::into_inner);
    }
  }

  pub fn close(&self) {
    self.lock().closed = true;
    self.ready.notify_all();
  }

  pub fn is_closed(&self) -> bool {
    self.lock().closed
  }
}

#[derive(Error, Debug)]
pub enum WorkerError {
  #[error("无法创建工作线程: {0}")]
  SpawnError(#[from] std::io::Error),
  #[error("检测器初始化失败: {0}")]
  SetupError(Box<dyn std::error::Error + Send + Sync>),
  #[error("检测器初始化过程中工作线程退出")]
  SetupAborted,
}

/// 工作器统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
  /// 提交的帧数
  pub submitted: u64,
  /// 被更新的帧覆盖而丢弃的帧数
  pub superseded: u64,
  /// 完成检测的帧数
  pub processed: u64,
}

#[derive(Debug, Default)]
struct Counters {
  submitted: AtomicU64,
  superseded: AtomicU64,
  processed: AtomicU64,
}

impl Counters {
  fn snapshot(&self) -> WorkerStats {
    WorkerStats {
      submitted: self.submitted.load(Ordering::Relaxed),
      superseded: self.superseded.load(Ordering::Relaxed),
      processed: self.processed.load(Ordering::Relaxed),
    }
  }
}

/// 工作线程处理完一帧后送回的结果
#[derive(Debug)]
pub struct Processed<F, O, E> {
  pub frame: F,
  pub result: Result<O, E>,
}

type ProcessedOf<M> = Processed<<M as Model>::Input, <M as Model>::Output, <M as Model>::Error>;

/// 在单独线程上持有检测器，逐帧检测，帧来得太快时只保留最新一帧。
///
/// 检测器在工作线程内创建和销毁，不会跨线程移动，同一时刻最多只有一次推理。
pub struct DetectionWorker<F> {
  slot: Arc<LatestSlot<F>>,
  counters: Arc<Counters>,
  handle: Option<JoinHandle<()>>,
}

impl<F: Send + 'static> DetectionWorker<F> {
  /// 启动工作线程并在其中调用 `setup` 创建检测器，初始化失败时直接返回错误
  pub fn spawn<S, M, SE>(setup: S) -> Result<(Self, Receiver<ProcessedOf<M>>), WorkerError>
  where
    S: FnOnce() -> Result<M, SE> + Send + 'static,
    SE: std::error::Error + Send + Sync + 'static,
    M: Model<Input = F> + 'static,
    M::Output: Send + 'static,
    M::Error: Send + 'static,
  {
    let slot = Arc::new(LatestSlot::new());
    let counters = Arc::new(Counters::default());
    let (result_tx, result_rx) = mpsc::channel();
    let (setup_tx, setup_rx) = mpsc::channel();

    let handle = {
      let slot = slot.clone();
      let counters = counters.clone();
      thread::Builder::new()
        .name(WORKER_THREAD_NAME.to_string())
        .spawn(move || {
          let model = match setup() {
            Ok(model) => {
              let _ = setup_tx.send(Ok(()));
              model
            }
            Err(e) => {
              slot.close();
              let _ = setup_tx.send(Err(e));
              return;
            }
          };
          run_worker(model, &slot, &counters, result_tx);
        })?
    };

    let mut worker = DetectionWorker {
      slot,
      counters,
      handle: Some(handle),
    };

    match setup_rx.recv() {
      Ok(Ok(())) => {
        info!("检测工作线程已启动");
        Ok((worker, result_rx))
      }
      Ok(Err(e)) => {
        worker.join();
        Err(WorkerError::SetupError(Box::new(e)))
      }
      Err(_) => {
        worker.join();
        Err(WorkerError::SetupAborted)
      }
    }
  }
}

fn run_worker<M: Model>(
  mut model: M,
  slot: &LatestSlot<M::Input>,
  counters: &Counters,
  results: Sender<ProcessedOf<M>>,
) {
  while let Some(frame) = slot.take() {
    let result = model.infer(&frame);
    counters.processed.fetch_add(1, Ordering::Relaxed);
    if results.send(Processed { frame, result }).is_err() {
      debug!("结果接收端已关闭, 工作线程退出");
      slot.close();
      break;
    }
  }
  debug!("工作线程退出, 释放检测器");
}

impl<F> DetectionWorker<F> {
  /// 提交一帧；若上一帧还未开始处理则将其丢弃。工作器已关闭时返回 `false`
  pub fn submit(&self, frame: F) -> bool {
    match self.slot.offer(frame) {
      Ok(superseded) => {
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        if superseded.is_some() {
          self.counters.superseded.fetch_add(1, Ordering::Relaxed);
          debug!("丢弃未处理的旧帧");
        }
        true
      }
      Err(_) => {
        warn!("工作器已关闭, 丢弃帧");
        false
      }
    }
  }

  pub fn stats(&self) -> WorkerStats {
    self.counters.snapshot()
  }

  /// 不再接受新帧；已提交的最后一帧仍会被处理
  pub fn close(&self) {
    self.slot.close();
  }

  /// 关闭并等待工作线程退出
  pub fn shutdown(mut self) -> WorkerStats {
    self.slot.close();
    self.join();
    self.counters.snapshot()
  }

  fn join(&mut self) {
    if let Some(handle) = self.handle.take()
      && handle.join().is_err()
    {
      warn!("检测工作线程异常退出");
    }
  }
}

impl<F> Drop for DetectionWorker<F> {
  fn drop(&mut self) {
    self.slot.close();
    self.join();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::{convert::Infallible, sync::mpsc::RecvTimeoutError, time::Duration};

  #[test]
  fn slot_keeps_only_latest() {
    let slot = LatestSlot::new();
    assert_eq!(slot.offer(1), Ok(None));
    assert_eq!(slot.offer(2), Ok(Some(1)));
    assert_eq!(slot.offer(3), Ok(Some(2)));
    assert_eq!(slot.take(), Some(3));
  }

  #[test]
  fn closed_slot_drains_then_ends() {
    let slot = LatestSlot::new();
    slot.offer("frame").unwrap();
    slot.close();
    assert!(slot.is_closed());
    assert_eq!(slot.offer("late"), Err("late"));
    assert_eq!(slot.take(), Some("frame"));
    assert_eq!(slot.take(), None);
  }

  #[test]
  fn take_wakes_on_offer() {
    let slot = Arc::new(LatestSlot::new());
    let consumer = {
      let slot = slot.clone();
      thread::spawn(move || slot.take())
    };
    thread::sleep(Duration::from_millis(20));
    slot.offer(7u32).unwrap();
    assert_eq!(consumer.join().unwrap(), Some(7));
  }

  /// 等待闸门打开后才完成推理，用来模拟推理慢于帧产生
  struct Gated {
    gate: Receiver<()>,
  }

  impl Model for Gated {
    type Input = u32;
    type Output = u32;
    type Error = Infallible;

    fn infer(&mut self, input: &u32) -> Result<u32, Infallible> {
      let _ = self.gate.recv();
      Ok(input * 10)
    }
  }

  #[test]
  fn superseded_frames_are_dropped() {
    let (gate_tx, gate_rx) = mpsc::channel();
    let (worker, results) =
      DetectionWorker::spawn(move || Ok::<_, Infallible>(Gated { gate: gate_rx })).unwrap();

    assert!(worker.submit(1));
    // 等工作线程取走第一帧
    while worker.slot.lock().pending.is_some() {
      thread::sleep(Duration::from_millis(1));
    }
    assert!(worker.submit(2));
    assert!(worker.submit(3));
    assert!(worker.submit(4));

    gate_tx.send(()).unwrap();
    gate_tx.send(()).unwrap();
    let first = results.recv_timeout(Duration::from_secs(5)).unwrap();
    let second = results.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!((first.frame, first.result), (1, Ok(10)));
    assert_eq!((second.frame, second.result), (4, Ok(40)));

    let stats = worker.shutdown();
    assert_eq!(
      stats,
      WorkerStats {
        submitted: 4,
        superseded: 2,
        processed: 2
      }
    );
    assert!(matches!(
      results.recv_timeout(Duration::from_millis(100)),
      Err(RecvTimeoutError::Disconnected)
    ));
  }

  #[test]
  fn setup_failure_is_reported() {
    let result = DetectionWorker::<u32>::spawn(|| {
      Err::<Gated, _>(std::io::Error::other("no model"))
    });
    assert!(matches!(result, Err(WorkerError::SetupError(_))));
  }

  #[test]
  fn submit_after_close_is_refused() {
    let (gate_tx, gate_rx) = mpsc::channel();
    let (worker, _results) =
      DetectionWorker::spawn(move || Ok::<_, Infallible>(Gated { gate: gate_rx })).unwrap();
    worker.close();
    assert!(!worker.submit(1));
    drop(gate_tx);
    assert_eq!(worker.shutdown().submitted, 0);
  }
}
