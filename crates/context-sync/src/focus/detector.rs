use std::sync::{Arc, Mutex, MutexGuard};

use convo_copilot_core::domain::{ConversationIdentity, FocusSource, FocusedConversation};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{AnchorId, ConversationSurface, SurfaceMutation};
use crate::config::FocusConfig;
use crate::events::{EventBroadcaster, EventStream, FocusEvent};

/// 会话焦点检测器。
///
/// 只在身份变化或心跳强制推送时发出事件，去重在这里完成，下游不再重复判断。
pub struct FocusDetector {
    surface: Arc<dyn ConversationSurface>,
    config: FocusConfig,
    bus: EventBroadcaster<FocusEvent>,
    last_emitted: Mutex<Option<FocusedConversation>>,
}

impl FocusDetector {
    pub fn new(
        surface: Arc<dyn ConversationSurface>,
        config: FocusConfig,
        bus: EventBroadcaster<FocusEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            surface,
            config,
            bus,
            last_emitted: Mutex::new(None),
        })
    }

    /// 订阅焦点变化事件。
    pub fn subscribe(&self) -> EventStream<FocusEvent> {
        self.bus.subscribe()
    }

    /// 最近一次发出的焦点。
    pub fn current(&self) -> Option<FocusedConversation> {
        self.last().clone()
    }

    /// 立即从页面同步读取会话身份，不经过事件通道。
    pub fn extract_now(&self) -> Option<ConversationIdentity> {
        let anchor = self.surface.anchor()?;
        self.read_identity(anchor).flatten()
    }

    /// 用户手动选择会话，总是发出事件。
    pub fn select_manually(&self, identity: ConversationIdentity) -> FocusedConversation {
        let focus = FocusedConversation::new(identity, FocusSource::Manual);
        info!(
            display_name = %focus.identity().display_name(),
            stable_id = ?focus.identity().stable_id(),
            "conversation selected manually"
        );
        self.publish(focus.clone(), true);
        focus
    }

    /// 读取一次并按去重规则决定是否发出事件。
    ///
    /// 锚点已失效时返回 `Err(())`，调用方需要重新获取锚点。
    fn observe(
        &self,
        anchor: AnchorId,
        source: FocusSource,
        force: bool,
    ) -> std::result::Result<Option<FocusedConversation>, ()> {
        let Some(identity) = self.read_identity(anchor).ok_or(())? else {
            debug!(anchor = anchor.0, source = ?source, "conversation header extraction missed");
            return Ok(None);
        };

        let unchanged = self
            .last()
            .as_ref()
            .is_some_and(|last| last.identity().same_conversation(&identity));
        if unchanged && !force {
            return Ok(None);
        }

        let focus = FocusedConversation::new(identity, source);
        if !unchanged {
            info!(
                display_name = %focus.identity().display_name(),
                stable_id = ?focus.identity().stable_id(),
                source = ?source,
                "focused conversation changed"
            );
        }
        self.publish(focus.clone(), force);
        Ok(Some(focus))
    }

    /// 外层 `None` 表示锚点已不存在，内层 `None` 表示读取未命中。
    fn read_identity(&self, anchor: AnchorId) -> Option<Option<ConversationIdentity>> {
        self.surface.header(anchor).map(|header| header.identity())
    }

    fn publish(&self, focus: FocusedConversation, forced: bool) {
        *self.last() = Some(focus.clone());
        self.bus.emit(FocusEvent { focus, forced });
    }

    fn last(&self) -> MutexGuard<'_, Option<FocusedConversation>> {
        self.last_emitted
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 运行检测循环，直到取消。
    ///
    /// 锚点丢失后每隔 `anchor_poll_ms` 重新查找，期间不发出任何事件。
    pub async fn run(
        self: Arc<Self>,
        mut mutations: mpsc::Receiver<SurfaceMutation>,
        cancel: CancellationToken,
    ) {
        let heartbeat_period = self.config.heartbeat();
        let anchor_poll = self.config.anchor_poll();
        let mut heartbeat = interval_at(Instant::now() + heartbeat_period, heartbeat_period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut reacquire = interval_at(Instant::now() + anchor_poll, anchor_poll);
        reacquire.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut anchor = self.acquire_anchor();
        let mut mutations_open = true;

        info!(
            heartbeat_ms = self.config.heartbeat_ms,
            anchor_poll_ms = self.config.anchor_poll_ms,
            "focus detector started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,

                mutation = mutations.recv(), if mutations_open => match mutation {
                    Some(SurfaceMutation::Subtree { anchor: changed })
                        if anchor == Some(changed) =>
                    {
                        if self.observe(changed, FocusSource::Mutation, false).is_err() {
                            anchor = self.lose_anchor(changed, &mut reacquire);
                        }
                    }
                    Some(SurfaceMutation::AnchorRemoved { anchor: removed })
                        if anchor == Some(removed) =>
                    {
                        anchor = self.lose_anchor(removed, &mut reacquire);
                    }
                    Some(stale) => debug!(mutation = ?stale, "ignoring mutation for stale anchor"),
                    None => {
                        debug!("mutation source closed, continuing with heartbeat only");
                        mutations_open = false;
                    }
                },

                _ = heartbeat.tick() => {
                    if let Some(current) = anchor {
                        let force = self.config.force_on_heartbeat;
                        if self.observe(current, FocusSource::PeriodicHeartbeat, force).is_err() {
                            anchor = self.lose_anchor(current, &mut reacquire);
                        }
                    }
                }

                _ = reacquire.tick(), if anchor.is_none() => {
                    anchor = self.acquire_anchor();
                }
            }
        }

        info!("focus detector stopped");
    }

    fn acquire_anchor(&self) -> Option<AnchorId> {
        let anchor = self.surface.anchor()?;
        info!(anchor = anchor.0, "conversation header anchor acquired");
        if self.observe(anchor, FocusSource::Mutation, false).is_err() {
            return None;
        }
        Some(anchor)
    }

    fn lose_anchor(
        &self,
        anchor: AnchorId,
        reacquire: &mut tokio::time::Interval,
    ) -> Option<AnchorId> {
        info!(anchor = anchor.0, "conversation header anchor lost, polling for replacement");
        reacquire.reset();
        None
    }
}
