// 该文件是 Xiyi （洗衣计数） 项目的一部分。
// src/task.rs - 任务定义
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
  sync::mpsc::{self, Receiver, TryRecvError},
  thread,
  time::{Duration, Instant},
};

use tracing::{debug, error, info, warn};

use crate::{
  model::Model,
  output::Render,
  worker::{DetectionWorker, Processed, WorkerStats},
};

const FORCE_EXIT_AFTER: Duration = Duration::from_secs(30);
const WARMUP_RUNS: usize = 2;

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error>;
}

/// 注册 Ctrl-C 处理函数，收到信号后通知任务循环退出；
/// 若任务在 30 秒内仍未结束则强制退出进程。每个进程只能注册一次。
pub fn interrupt_channel() -> Result<Receiver<()>, ctrlc::Error> {
  let (tx, rx) = mpsc::channel();
  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    let _ = tx.send(());
    thread::spawn(|| {
      thread::sleep(FORCE_EXIT_AFTER);
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })?;
  Ok(rx)
}

fn interrupted(stop: &Option<Receiver<()>>) -> bool {
  stop.as_ref().is_some_and(|rx| rx.try_recv().is_ok())
}

pub struct OneShotTask;

impl<
  F,
  D,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = D, Error = ME>,
  O: Render<F, D, Error = RE>,
> Task<I, M, O> for OneShotTask
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, mut model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始推理...");
    let now = Instant::now();
    let result = model.infer(&frame)?;
    let inferred = now.elapsed();
    output.render_result(&frame, &result)?;
    info!(
      "推理耗时: {:.2?}, 推理与渲染共耗时: {:.2?}",
      inferred,
      now.elapsed()
    );

    Ok(())
  }
}

/// 对同一帧反复推理，统计平均耗时（去掉前两次预热）
#[derive(Debug)]
pub struct RepeatShotTask {
  times: usize,
}

impl Default for RepeatShotTask {
  fn default() -> Self {
    Self { times: 1000 }
  }
}

impl RepeatShotTask {
  pub fn with_times(mut self, times: usize) -> Self {
    self.times = times.max(1);
    self
  }
}

fn average_after_warmup(times: &[Duration]) -> Option<Duration> {
  let measured = if times.len() > WARMUP_RUNS {
    &times[WARMUP_RUNS..]
  } else {
    times
  };
  if measured.is_empty() {
    return None;
  }
  Some(measured.iter().sum::<Duration>() / measured.len() as u32)
}

impl<
  F,
  D,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = D, Error = ME>,
  O: Render<F, D, Error = RE>,
> Task<I, M, O> for RepeatShotTask
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, mut model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始推理 {} 次...", self.times);
    let mut times = Vec::with_capacity(self.times);
    for i in 0..self.times {
      let now = Instant::now();
      let result = model.infer(&frame)?;
      let elapsed = now.elapsed();
      debug!("({})推理完成，耗时: {:.2?}", i, elapsed);
      output.render_result(&frame, &result)?;
      times.push(elapsed);
    }

    if let Some(average) = average_after_warmup(&times) {
      warn!("平均推理时间: {:.2?}", average);
    }

    Ok(())
  }
}

/// 逐帧顺序处理：取帧、推理、渲染，处理完一帧再取下一帧
#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
  stop: Option<Receiver<()>>,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  pub fn with_stop_signal(mut self, stop: Receiver<()>) -> Self {
    self.stop = Some(stop);
    self
  }
}

impl<
  F,
  D,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = D, Error = ME>,
  O: Render<F, D, Error = RE>,
> Task<I, M, O> for ContinuousTask
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, mut model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");

    let mut frame_count = 0usize;
    let mut now = Instant::now();
    for frame in input {
      frame_count += 1;
      debug!("处理第 {} 帧图像", frame_count);
      let result = model.infer(&frame)?;
      let elapsed_a = now.elapsed();
      output.render_result(&frame, &result)?;
      let elapsed_b = now.elapsed();
      now = Instant::now();
      info!("推理完成，耗时: {:.2?} / {:.2?}", elapsed_a, elapsed_b);
      if self.frame_number.is_some_and(|n| frame_count >= n) {
        info!("达到指定帧数 {}, 退出任务循环", frame_count);
        break;
      }
      if interrupted(&self.stop) {
        warn!("中断信号接收，退出任务循环");
        break;
      }
    }

    info!("任务完成，共处理 {} 帧", frame_count);
    Ok(())
  }
}

/// 取帧与检测分离：检测器在工作线程上运行，取帧速度超过检测速度时
/// 只检测最新的帧，其余帧被丢弃。
///
/// `model` 参数是创建检测器的闭包，会在工作线程中调用。
#[derive(Default, Debug)]
pub struct LatestFrameTask {
  frame_number: Option<usize>,
  stop: Option<Receiver<()>>,
}

impl LatestFrameTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  pub fn with_stop_signal(mut self, stop: Receiver<()>) -> Self {
    self.stop = Some(stop);
    self
  }
}

fn render_processed<F, D, ME, O>(
  output: &O,
  processed: Processed<F, D, ME>,
) -> Result<(), anyhow::Error>
where
  ME: std::error::Error + Sync + Send + 'static,
  O: Render<F, D>,
  O::Error: std::error::Error + Sync + Send + 'static,
{
  let result = processed.result.inspect_err(|e| error!("检测失败: {}", e))?;
  output.render_result(&processed.frame, &result)?;
  Ok(())
}

impl<F, D, ME, RE, SE, I, M, S, O> Task<I, S, O> for LatestFrameTask
where
  F: Send + 'static,
  D: Send + 'static,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  SE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = D, Error = ME> + 'static,
  S: FnOnce() -> Result<M, SE> + Send + 'static,
  O: Render<F, D, Error = RE>,
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, setup: S, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let (worker, results) = DetectionWorker::spawn(setup)?;

    let mut frame_count = 0usize;
    for frame in input {
      frame_count += 1;
      if !worker.submit(frame) {
        break;
      }

      loop {
        match results.try_recv() {
          Ok(processed) => render_processed(&output, processed)?,
          Err(TryRecvError::Empty) => break,
          Err(TryRecvError::Disconnected) => {
            return Err(anyhow::anyhow!("检测工作线程意外退出"));
          }
        }
      }

      if self.frame_number.is_some_and(|n| frame_count >= n) {
        info!("达到指定帧数 {}, 退出任务循环", frame_count);
        break;
      }
      if interrupted(&self.stop) {
        warn!("中断信号接收，退出任务循环");
        break;
      }
    }

    // 最后一帧仍会被处理，工作线程退出后通道断开
    worker.close();
    for processed in results.iter() {
      render_processed(&output, processed)?;
    }

    let WorkerStats {
      submitted,
      superseded,
      processed,
    } = worker.shutdown();
    info!(
      "任务完成: 提交 {} 帧, 丢弃 {} 帧, 检测 {} 帧",
      submitted, superseded, processed
    );
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::{
    cell::RefCell,
    convert::Infallible,
    sync::{Arc, Mutex},
  };

  struct Doubler;

  impl Model for Doubler {
    type Input = u32;
    type Output = u32;
    type Error = Infallible;

    fn infer(&mut self, input: &u32) -> Result<u32, Infallible> {
      Ok(input * 2)
    }
  }

  #[derive(Debug, thiserror::Error)]
  #[error("推理失败")]
  struct Broken;

  struct Failing;

  impl Model for Failing {
    type Input = u32;
    type Output = u32;
    type Error = Broken;

    fn infer(&mut self, _: &u32) -> Result<u32, Broken> {
      Err(Broken)
    }
  }

  #[derive(Default)]
  struct Collect(RefCell<Vec<(u32, u32)>>);

  impl Render<u32, u32> for &Collect {
    type Error = Infallible;

    fn render_result(&self, frame: &u32, result: &u32) -> Result<(), Infallible> {
      self.0.borrow_mut().push((*frame, *result));
      Ok(())
    }
  }

  #[test]
  fn one_shot_uses_first_frame() {
    let collect = Collect::default();
    OneShotTask.run_task(vec![3, 4].into_iter(), Doubler, &collect).unwrap();
    assert_eq!(*collect.0.borrow(), vec![(3, 6)]);
  }

  #[test]
  fn one_shot_without_input_fails() {
    let collect = Collect::default();
    assert!(OneShotTask.run_task(std::iter::empty(), Doubler, &collect).is_err());
  }

  #[test]
  fn repeat_shot_runs_requested_times() {
    let collect = Collect::default();
    RepeatShotTask::default()
      .with_times(5)
      .run_task(vec![1].into_iter(), Doubler, &collect)
      .unwrap();
    assert_eq!(collect.0.borrow().len(), 5);
  }

  #[test]
  fn warmup_is_skipped_only_when_enough_runs() {
    let ms = Duration::from_millis;
    assert_eq!(average_after_warmup(&[ms(100), ms(50), ms(10), ms(20)]), Some(ms(15)));
    assert_eq!(average_after_warmup(&[ms(10), ms(20)]), Some(ms(15)));
    assert_eq!(average_after_warmup(&[]), None);
  }

  #[test]
  fn continuous_stops_at_frame_number() {
    let collect = Collect::default();
    ContinuousTask::default()
      .with_frame_number(Some(3))
      .run_task(1..100, Doubler, &collect)
      .unwrap();
    assert_eq!(*collect.0.borrow(), vec![(1, 2), (2, 4), (3, 6)]);
  }

  #[test]
  fn continuous_stops_on_signal() {
    let (tx, rx) = mpsc::channel();
    tx.send(()).unwrap();
    let collect = Collect::default();
    ContinuousTask::default()
      .with_stop_signal(rx)
      .run_task(1..100, Doubler, &collect)
      .unwrap();
    assert_eq!(collect.0.borrow().len(), 1);
  }

  #[test]
  fn continuous_propagates_model_errors() {
    let collect = Collect::default();
    assert!(ContinuousTask::default().run_task(1..3, Failing, &collect).is_err());
  }

  #[derive(Default, Clone)]
  struct Shared(Arc<Mutex<Vec<(u32, u32)>>>);

  impl Render<u32, u32> for Shared {
    type Error = Infallible;

    fn render_result(&self, frame: &u32, result: &u32) -> Result<(), Infallible> {
      self
        .0
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .push((*frame, *result));
      Ok(())
    }
  }

  #[test]
  fn latest_frame_always_processes_last_frame() {
    let shared = Shared::default();
    LatestFrameTask::default()
      .run_task(1..=50u32, || Ok::<_, Infallible>(Doubler), shared.clone())
      .unwrap();

    let rendered = shared.0.lock().unwrap().clone();
    assert!(!rendered.is_empty());
    assert!(rendered.iter().all(|(frame, result)| *result == frame * 2));
    assert!(rendered.windows(2).all(|w| w[0].0 < w[1].0));
    assert_eq!(rendered.last(), Some(&(50, 100)));
  }

  #[test]
  fn latest_frame_reports_setup_failure() {
    let result = LatestFrameTask::default().run_task(
      1..3u32,
      || Err::<Doubler, _>(Broken),
      Shared::default(),
    );
    assert!(result.is_err());
  }

  #[test]
  fn latest_frame_propagates_detection_errors() {
    let result = LatestFrameTask::default().run_task(
      1..3u32,
      || Ok::<_, Infallible>(Failing),
      Shared::default(),
    );
    assert!(result.is_err());
  }
}
