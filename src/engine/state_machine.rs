// ==========================================
// 牛奶冷链物流系统 - 批次状态机
// ==========================================
// 职责: (状态, 事件) 查表判定迁移是否合法, 表外即拒绝
// 红线: 终态 (sold_fresh / processed / spoiled) 不接受任何事件
// ==========================================

use crate::domain::types::{BatchEvent, BatchStatus};
use crate::engine::error::{EngineError, EngineResult};

/// 迁移表: 表中每行为一条合法迁移
const TRANSITIONS: &[(BatchStatus, BatchEvent, BatchStatus)] = &[
    (BatchStatus::Collected, BatchEvent::DeliverToCenter, BatchStatus::AtCenter),
    (BatchStatus::AtCenter, BatchEvent::Dispatch, BatchStatus::InTransit),
    (BatchStatus::AtCenter, BatchEvent::SellFresh, BatchStatus::SoldFresh),
    (BatchStatus::InTransit, BatchEvent::DeliverToPlant, BatchStatus::AtPlant),
    (BatchStatus::InTransit, BatchEvent::SellFresh, BatchStatus::SoldFresh),
    (BatchStatus::AtPlant, BatchEvent::Process, BatchStatus::Processed),
];

/// 判定迁移并返回目标状态
///
/// spoil 事件对任意非终态有效, 其余事件查迁移表
pub fn next_status(current: BatchStatus, event: BatchEvent) -> EngineResult<BatchStatus> {
    if event == BatchEvent::Spoil {
        if current.is_terminal() {
            return Err(EngineError::InvalidTransition { from: current, event });
        }
        return Ok(BatchStatus::Spoiled);
    }

    TRANSITIONS
        .iter()
        .find(|(from, ev, _)| *from == current && *ev == event)
        .map(|(_, _, to)| *to)
        .ok_or(EngineError::InvalidTransition { from: current, event })
}

/// 当前状态下的合法事件集合 (管理端展示用)
pub fn allowed_events(current: BatchStatus) -> Vec<BatchEvent> {
    let mut events: Vec<BatchEvent> = TRANSITIONS
        .iter()
        .filter(|(from, _, _)| *from == current)
        .map(|(_, ev, _)| *ev)
        .collect();
    if !current.is_terminal() {
        events.push(BatchEvent::Spoil);
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scenario_1_happy_path_to_processed() {
        let mut status = BatchStatus::Collected;
        for event in [
            BatchEvent::DeliverToCenter,
            BatchEvent::Dispatch,
            BatchEvent::DeliverToPlant,
            BatchEvent::Process,
        ] {
            status = next_status(status, event).unwrap();
        }
        assert_eq!(status, BatchStatus::Processed, "全链路应到达 processed");
    }

    #[test]
    fn test_scenario_2_fresh_sale_branches() {
        // 中心直销与在途转售都允许
        let status = next_status(BatchStatus::AtCenter, BatchEvent::SellFresh).unwrap();
        assert_eq!(status, BatchStatus::SoldFresh);
        let status = next_status(BatchStatus::InTransit, BatchEvent::SellFresh).unwrap();
        assert_eq!(status, BatchStatus::SoldFresh);
    }

    #[test]
    fn test_scenario_3_spoil_from_any_nonterminal() {
        for from in [
            BatchStatus::Collected,
            BatchStatus::AtCenter,
            BatchStatus::InTransit,
            BatchStatus::AtPlant,
        ] {
            assert_eq!(
                next_status(from, BatchEvent::Spoil).unwrap(),
                BatchStatus::Spoiled,
                "非终态 {} 应可判废",
                from
            );
        }
    }

    #[test]
    fn test_scenario_4_terminal_rejects_everything() {
        for from in [
            BatchStatus::SoldFresh,
            BatchStatus::Processed,
            BatchStatus::Spoiled,
        ] {
            for event in [
                BatchEvent::DeliverToCenter,
                BatchEvent::Dispatch,
                BatchEvent::DeliverToPlant,
                BatchEvent::Process,
                BatchEvent::SellFresh,
                BatchEvent::Spoil,
            ] {
                assert!(
                    next_status(from, event).is_err(),
                    "终态 {} 不应接受事件 {}",
                    from,
                    event
                );
            }
        }
    }

    #[test]
    fn test_scenario_5_skipping_stage_rejected() {
        // 未经中心直接发运 / 未到厂直接加工, 均拒绝
        assert!(next_status(BatchStatus::Collected, BatchEvent::Dispatch).is_err());
        assert!(next_status(BatchStatus::InTransit, BatchEvent::Process).is_err());
        assert!(next_status(BatchStatus::Collected, BatchEvent::SellFresh).is_err());
    }

    #[test]
    fn test_scenario_6_allowed_events_listing() {
        let events = allowed_events(BatchStatus::AtCenter);
        assert!(events.contains(&BatchEvent::Dispatch));
        assert!(events.contains(&BatchEvent::SellFresh));
        assert!(events.contains(&BatchEvent::Spoil));
        assert_eq!(events.len(), 3);

        assert!(allowed_events(BatchStatus::Processed).is_empty(), "终态无合法事件");
    }
}
