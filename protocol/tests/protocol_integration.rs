// End-to-end flows through the protocol orchestration layer: seeding,
// two-phase opens and closes, liquidation sweeps, abandoned-action
// settlement and the rebalancer trigger.

use protocol::{
    FeedOracle, FundingConfig, LedgerConfig, MintableToken, NoRewards, Protocol, ProtocolConfig,
    ProtocolError, RebalancerConfig, RebaseToken, LEVERAGE_SCALE, REBALANCER_ADDRESS,
};
use testutil::{init_test_logging, test_address, units};

type TestProtocol = Protocol<FeedOracle, NoRewards, MintableToken>;

fn test_config() -> ProtocolConfig {
    ProtocolConfig {
        ledger: LedgerConfig {
            tick_spacing: 100,
            min_leverage: LEVERAGE_SCALE + 1,
            max_leverage: 10 * LEVERAGE_SCALE,
            min_long_position: 1_000,
            safety_margin_bps: 0,
            liquidation_penalty_bps: 0,
        },
        funding: FundingConfig {
            ema_period: 86_400,
            funding_sf: 0,
        },
        rebalancer: RebalancerConfig {
            deposit_limit_bps: 20_000,
            withdrawal_limit_bps: 20_000,
            open_limit_bps: 20_000,
            close_limit_bps: 20_000,
            trigger_imbalance_bps: 30_000,
            position_leverage: 3 * LEVERAGE_SCALE,
        },
        fee_bps: 0,
        fee_threshold: units(1),
        security_deposit: 0,
        validation_delay: 24,
        validation_deadline: 1_200,
        max_queue_len: 255,
        liquidation_iterations: 10,
    }
}

/// Seed at price 2000: 8 ETH long (liq ~667) plus 10 ETH vault.
fn seeded(config: ProtocolConfig) -> TestProtocol {
    init_test_logging();
    let mut oracle = FeedOracle::new(300, 0);
    oracle.push(1_000, 2_000, 2_000);
    let mut p = Protocol::new(config, oracle, NoRewards, MintableToken::new(1));
    p.initialize(test_address(1), units(8), units(10), 667, 2_000, 1_000)
        .unwrap();
    p
}

#[test]
fn test_open_places_at_tick_and_leaves_vault_untouched() {
    let mut p = seeded(test_config());
    let expo_before = p.ledger().total_expo();
    let vault_before = p.state().balance_vault;

    p.oracle_mut().push(2_000, 2_000, 2_000);
    // 2 ETH at 2x: liquidation price 1000 -> tick 10
    let (id, _) = p
        .initiate_open_position(test_address(3), units(2), 1_000, 0, &[], 0, 2_000)
        .unwrap();
    assert_eq!(id.tick, 10);
    assert_eq!(p.ledger().total_expo(), expo_before + units(4));
    assert_eq!(p.state().balance_vault, vault_before);
    assert_eq!(p.state().balance_long, units(8) + units(2));

    p.oracle_mut().push(2_030, 2_000, 2_000);
    assert!(
        p.validate_open_position(test_address(3), &[], 0, 2_030)
            .unwrap()
            .0
    );
    assert_eq!(p.state().balance_vault, vault_before);
    assert!(p.ledger().get_position(&id).unwrap().validated);
}

#[test]
fn test_open_then_close_returns_at_most_input() {
    let mut config = test_config();
    config.fee_bps = 10;
    let mut p = seeded(config);

    p.oracle_mut().push(2_000, 2_000, 2_000);
    let (id, _) = p
        .initiate_open_position(test_address(3), units(2), 1_000, 0, &[], 0, 2_000)
        .unwrap();
    p.oracle_mut().push(2_030, 2_000, 2_000);
    p.validate_open_position(test_address(3), &[], 0, 2_030)
        .unwrap();

    p.initiate_close_position(test_address(3), id, units(2), 0, &[], 0, 2_100)
        .unwrap();
    p.oracle_mut().push(2_130, 2_000, 2_000);
    let (payout, _) = p
        .validate_close_position(test_address(3), &[], 0, 2_130)
        .unwrap();
    // price unchanged: fees and rounding only ever reduce
    assert!(payout <= units(2));
    assert!(payout > 0);
}

#[test]
fn test_liquidated_position_reports_not_found() {
    let mut p = seeded(test_config());
    p.oracle_mut().push(2_000, 2_000, 2_000);
    let (id, _) = p
        .initiate_open_position(test_address(3), units(2), 1_000, 0, &[], 0, 2_000)
        .unwrap();
    p.oracle_mut().push(2_030, 2_000, 2_000);
    p.validate_open_position(test_address(3), &[], 0, 2_030)
        .unwrap();

    let version_before = p.ledger().tick_version(10);
    p.oracle_mut().push(3_000, 900, 900);
    let (result, _) = p.liquidate(&[], 0, 10, 3_000).unwrap();
    assert!(result
        .liquidated_ticks
        .iter()
        .any(|t| t.tick == 10 && t.version == version_before));

    // the stale id resolves to nothing, never to another user's data
    assert!(p.ledger().get_position(&id).is_none());
    assert_eq!(p.ledger().tick_version(10), version_before + 1);
    p.oracle_mut().push(3_100, 900, 900);
    assert_eq!(
        p.initiate_close_position(test_address(3), id, units(2), 0, &[], 0, 3_100),
        Err(ProtocolError::PositionNotFound)
    );
}

#[test]
fn test_single_tick_crossing_liquidates_only_that_tick() {
    let mut p = seeded(test_config());
    p.oracle_mut().push(2_000, 2_000, 2_000);
    p.initiate_open_position(test_address(3), units(2), 1_000, 0, &[], 0, 2_000)
        .unwrap();
    p.oracle_mut().push(2_010, 2_000, 2_000);
    p.initiate_open_position(test_address(4), units(2), 500, 0, &[], 0, 2_010)
        .unwrap();

    // 950 crosses tick 10 but not tick 5 (and not the seed tick 6)
    p.oracle_mut().push(3_000, 950, 950);
    let (result, _) = p.liquidate(&[], 0, 10, 3_000).unwrap();
    assert_eq!(result.liquidated_ticks.len(), 1);
    assert_eq!(result.liquidated_ticks[0].tick, 10);
    assert!(!result.pending);
    assert!(p.ledger().is_tick_populated(5));
    assert!(p.ledger().is_tick_populated(6));
}

#[test]
fn test_iteration_cap_leaves_liquidation_pending() {
    let mut p = seeded(test_config());
    for (i, (user, liq)) in [(3u8, 1_500), (4, 1_200), (5, 1_000)].iter().enumerate() {
        let now = 2_000 + i as u64 * 10;
        p.oracle_mut().push(now, 2_000, 2_000);
        p.initiate_open_position(test_address(*user), units(2), *liq, 0, &[], 0, now)
            .unwrap();
    }

    p.oracle_mut().push(3_000, 900, 900);
    let (result, _) = p.liquidate(&[], 0, 2, 3_000).unwrap();
    assert_eq!(result.liquidated_ticks.len(), 2);
    assert_eq!(result.liquidated_ticks[0].tick, 15);
    assert_eq!(result.liquidated_ticks[1].tick, 12);
    assert!(result.pending);

    // a later call resumes where the cap stopped
    let (result, _) = p.liquidate(&[], 0, 10, 3_010).unwrap();
    assert_eq!(result.liquidated_ticks.len(), 1);
    assert_eq!(result.liquidated_ticks[0].tick, 10);
    assert!(!result.pending);
}

#[test]
fn test_abandoned_withdrawal_settled_by_third_party() {
    let mut config = test_config();
    config.security_deposit = 50;
    let mut p = seeded(config);

    p.oracle_mut().push(2_000, 2_000, 2_000);
    p.initiate_withdrawal(test_address(1), units(4), 50, &[], 0, 2_000)
        .unwrap();
    assert_eq!(p.state().security_deposits, 50);

    // before the deadline a third party gets nothing
    p.oracle_mut().push(2_024, 2_000, 2_000);
    let (settled, _) = p
        .validate_actionable(test_address(9), &[], 0, 10, 2_500)
        .unwrap();
    assert_eq!(settled, 0);

    // past the deadline the action is settled and the deposit changes hands
    p.oracle_mut().push(3_300, 2_000, 2_000);
    let (settled, deposits) = p
        .validate_actionable(test_address(9), &[], 0, 10, 3_300)
        .unwrap();
    assert_eq!(settled, 1);
    assert_eq!(deposits, 50);
    assert!(p.pending().is_empty());
    assert_eq!(p.state().security_deposits, 0);
    assert_eq!(p.state().balance_vault, units(6));
    // the owner can initiate again
    p.oracle_mut().push(3_400, 2_000, 2_000);
    p.initiate_deposit(test_address(1), units(1), 50, &[], 0, 3_400)
        .unwrap();
}

#[test]
fn test_rebalancer_opens_after_liquidation() {
    let mut config = test_config();
    config.rebalancer.trigger_imbalance_bps = 500;
    let mut p = seeded(config);
    p.rebalancer_mut().fund(units(2));

    p.oracle_mut().push(2_000, 2_000, 2_000);
    p.initiate_open_position(test_address(3), units(2), 1_500, 0, &[], 0, 2_000)
        .unwrap();
    p.oracle_mut().push(2_030, 2_000, 2_000);
    p.validate_open_position(test_address(3), &[], 0, 2_030)
        .unwrap();

    // the drop wipes tick 15, leaving the book vault-heavy; the trigger
    // deploys the pending rebalancer assets as a pooled position
    p.oracle_mut().push(3_000, 1_400, 1_400);
    p.liquidate(&[], 0, 10, 3_000).unwrap();

    let id = p.rebalancer().position().expect("pooled position opened");
    let pos = p.ledger().get_position(&id).unwrap();
    assert_eq!(pos.user, REBALANCER_ADDRESS);
    assert!(pos.validated);
    assert_eq!(p.rebalancer().pending_assets(), 0);
}

#[test]
fn test_deposit_withdrawal_share_accounting() {
    let mut p = seeded(test_config());

    p.oracle_mut().push(2_000, 2_000, 2_000);
    p.initiate_deposit(test_address(2), units(5), 0, &[], 0, 2_000)
        .unwrap();
    p.oracle_mut().push(2_030, 2_000, 2_000);
    let (minted, _) = p.validate_deposit(test_address(2), &[], 0, 2_030).unwrap();
    assert_eq!(minted, units(5));
    assert_eq!(p.token().total_shares(), units(15));
    assert_eq!(p.state().balance_vault, units(15));

    p.oracle_mut().push(2_100, 2_000, 2_000);
    p.initiate_withdrawal(test_address(2), minted, 0, &[], 0, 2_100)
        .unwrap();
    p.oracle_mut().push(2_130, 2_000, 2_000);
    let (assets, _) = p
        .validate_withdrawal(test_address(2), &[], 0, 2_130)
        .unwrap();
    // price unchanged: the round trip returns the deposit
    assert_eq!(assets, units(5));
    assert_eq!(p.state().balance_vault, units(10));
    assert_eq!(p.token().shares_of(&test_address(2)), 0);
}

#[test]
fn test_conservation_across_price_moves() {
    let mut p = seeded(test_config());
    p.oracle_mut().push(2_000, 2_000, 2_000);
    p.initiate_open_position(test_address(3), units(2), 1_000, 0, &[], 0, 2_000)
        .unwrap();

    let total_before = p.state().balance_long + p.state().balance_vault;
    for (i, price) in [2_200u128, 1_800, 2_100, 1_700].iter().enumerate() {
        let now = 3_000 + i as u64 * 100;
        p.oracle_mut().push(now, *price, *price);
        p.liquidate(&[], 0, 10, now).unwrap();
        // funding is off and fees are zero: PnL and liquidations only move
        // assets between the two sides
        assert_eq!(
            p.state().balance_long + p.state().balance_vault,
            total_before
        );
    }
}
