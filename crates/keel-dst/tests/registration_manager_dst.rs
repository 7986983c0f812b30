//! DST tests for the controller registration manager
//!
//! TigerStyle: Deterministic testing of the registration lifecycle,
//! verifying at every observation point:
//!
//! - SingleInFlight: at most one request outstanding
//! - RegistrationReflectsLog: registered only when the log carries our record
//! - NoRetryWhenSettled: no retry armed once registered or suspended
//! - NoSendWhileUnsupported: nothing sent below the registration version

use keel_controller::{ApiError, ChannelError, ControllerRegistrationResponse, RegistrationManager};
use keel_core::config::RegistrationConfig;
use keel_core::error::Error as CoreError;
use keel_dst::{SimConfig, SimEnvironment, SimMetadataLog, Simulation, StateRecorder};
use keel_metadata::{ControllerRegistrationRecord, MetadataVersion, Observation};

// =============================================================================
// Test Helpers
// =============================================================================

const CONTROLLER_ID: i32 = 1;
const LEADER_ID: i32 = 3000;

/// Delay before the first retry under `RegistrationConfig::for_testing`
const FIRST_RETRY_MS: u64 = 10;

fn supported() -> MetadataVersion {
    MetadataVersion::CONTROLLER_REGISTRATION
}

fn unsupported() -> MetadataVersion {
    MetadataVersion::from_feature_level(14)
}

struct Fixture {
    manager: RegistrationManager,
    log: SimMetadataLog,
    recorder: StateRecorder,
}

fn fixture(env: &SimEnvironment, version: MetadataVersion) -> Result<Fixture, CoreError> {
    env.channel.set_leader(Some(env.node(LEADER_ID)));
    let manager = env.manager(env.identity(CONTROLLER_ID), RegistrationConfig::for_testing())?;
    Ok(Fixture {
        manager,
        log: SimMetadataLog::new(version),
        recorder: StateRecorder::new(),
    })
}

/// Run a single-manager scenario and fail the test on any error
fn run_scenario<F, Fut>(test: F)
where
    F: FnOnce(SimEnvironment) -> Fut,
    Fut: std::future::Future<Output = Result<(), CoreError>>,
{
    let config = SimConfig::from_env_or_random();
    let result = Simulation::new(config).run(test);
    assert!(result.is_ok(), "Test failed: {:?}", result.err());
}

// =============================================================================
// Lifecycle Scenarios
// =============================================================================

/// A manager that was never started reports nothing
#[test]
fn test_dst_cold_start_not_started() {
    run_scenario(|env| async move {
        let mut f = fixture(&env, supported())?;

        let state = env.check(&mut f.recorder, &f.manager, &f.log).await?;
        assert!(!state.stats.registered);
        assert_eq!(
            (
                state.stats.pending_rpcs,
                state.stats.successful_rpcs,
                state.stats.failed_rpcs
            ),
            (0, 0, 0)
        );
        assert!(state.stats.last_observation.is_none());
        Ok(())
    });
}

/// Images seen before start are remembered; start sends for them
#[test]
fn test_dst_metadata_before_start() {
    run_scenario(|env| async move {
        let mut f = fixture(&env, supported())?;

        f.log.publish_snapshot(&f.manager, env.now_ms());
        let state = env.check(&mut f.recorder, &f.manager, &f.log).await?;
        assert_eq!(state.stats.last_observation, Some(Observation::Missing));
        assert_eq!(state.stats.pending_rpcs, 0);
        assert_eq!(env.channel.sent_count(), 0);

        env.start(&f.manager)?;
        let state = env.check(&mut f.recorder, &f.manager, &f.log).await?;
        assert_eq!(state.stats.pending_rpcs, 1);
        assert_eq!(env.channel.sent_count(), 1);
        Ok(())
    });
}

/// Nothing is sent while the metadata version predates registration
#[test]
fn test_dst_unsupported_version_stays_idle() {
    run_scenario(|env| async move {
        let mut f = fixture(&env, unsupported())?;
        env.start(&f.manager)?;

        f.log.publish_snapshot(&f.manager, env.now_ms());
        f.log.append_noop(&f.manager, env.now_ms());
        env.advance_time_ms(60_000);

        let state = env.check(&mut f.recorder, &f.manager, &f.log).await?;
        assert!(!state.stats.registered);
        assert_eq!(
            (
                state.stats.pending_rpcs,
                state.stats.successful_rpcs,
                state.stats.failed_rpcs
            ),
            (0, 0, 0)
        );
        assert!(!state.stats.retry_scheduled);
        assert_eq!(env.channel.sent_count(), 0);
        Ok(())
    });
}

/// Success does not register; the record in the log does
#[test]
fn test_dst_register_after_record_appears() {
    run_scenario(|env| async move {
        let mut f = fixture(&env, supported())?;
        env.start(&f.manager)?;

        f.log.publish_snapshot(&f.manager, env.now_ms());
        let state = env.check(&mut f.recorder, &f.manager, &f.log).await?;
        assert_eq!(state.stats.pending_rpcs, 1);

        let request = env
            .channel
            .respond(ControllerRegistrationResponse::ok())
            .expect("request outstanding");
        assert_eq!(request.controller_id, f.manager.controller_id());
        assert_eq!(request.incarnation_id, f.manager.incarnation_id());

        let state = env.check(&mut f.recorder, &f.manager, &f.log).await?;
        assert!(!state.stats.registered);
        assert_eq!(
            (
                state.stats.pending_rpcs,
                state.stats.successful_rpcs,
                state.stats.failed_rpcs
            ),
            (0, 1, 0)
        );

        f.log.apply_registration(&f.manager, &request, env.now_ms());
        let state = env.check(&mut f.recorder, &f.manager, &f.log).await?;
        assert!(state.stats.registered);
        assert_eq!(state.stats.last_observation, Some(Observation::Confirmed));
        assert_eq!(env.channel.sent_count(), 1);
        Ok(())
    });
}

/// A record from another incarnation triggers a fresh attempt
#[test]
fn test_dst_stale_incarnation_reregisters() {
    run_scenario(|env| async move {
        let mut f = fixture(&env, supported())?;
        env.start(&f.manager)?;

        f.log.publish_snapshot(&f.manager, env.now_ms());
        env.check(&mut f.recorder, &f.manager, &f.log).await?;
        env.channel
            .respond(ControllerRegistrationResponse::ok())
            .expect("request in flight");
        let state = env.check(&mut f.recorder, &f.manager, &f.log).await?;
        assert_eq!(state.stats.successful_rpcs, 1);

        // A previous process with the same controller id wins the log
        let previous = env.identity(CONTROLLER_ID);
        assert_ne!(previous.incarnation_id(), f.manager.incarnation_id());
        f.log.put_record(
            &f.manager,
            ControllerRegistrationRecord::from_identity(&previous),
            env.now_ms(),
        );

        let state = env.check(&mut f.recorder, &f.manager, &f.log).await?;
        assert!(!state.stats.registered);
        assert!(matches!(
            state.stats.last_observation,
            Some(Observation::StaleIncarnation { .. })
        ));
        assert_eq!(state.stats.pending_rpcs, 1);
        assert_eq!(env.channel.sent_count(), 2);

        let request = env
            .channel
            .respond(ControllerRegistrationResponse::ok())
            .expect("second request outstanding");
        f.log.apply_registration(&f.manager, &request, env.now_ms());

        let state = env.check(&mut f.recorder, &f.manager, &f.log).await?;
        assert!(state.stats.registered);
        assert_eq!(state.stats.successful_rpcs, 2);
        Ok(())
    });
}

/// UNSUPPORTED_VERSION suspends until metadata moves forward
#[test]
fn test_dst_unsupported_version_response_suspends() {
    run_scenario(|env| async move {
        let mut f = fixture(&env, supported())?;
        env.start(&f.manager)?;

        f.log.publish_snapshot(&f.manager, env.now_ms());
        env.check(&mut f.recorder, &f.manager, &f.log).await?;
        env.channel
            .respond(ControllerRegistrationResponse::with_error(
                ApiError::UnsupportedVersion,
                "leader too old",
            ))
            .expect("request in flight");

        let state = env.check(&mut f.recorder, &f.manager, &f.log).await?;
        assert_eq!(state.stats.failed_rpcs, 1);
        assert!(state.stats.suspended);
        assert!(!state.stats.retry_scheduled);

        // No timer fires however long we wait
        env.advance_time_ms(10 * 60 * 1000);
        env.check(&mut f.recorder, &f.manager, &f.log).await?;
        assert_eq!(env.channel.sent_count(), 1);

        f.log.set_metadata_version(
            &f.manager,
            MetadataVersion::from_feature_level(16),
            env.now_ms(),
        );
        let state = env.check(&mut f.recorder, &f.manager, &f.log).await?;
        assert!(!state.stats.suspended);
        assert_eq!(state.stats.pending_rpcs, 1);
        assert_eq!(env.channel.sent_count(), 2);
        Ok(())
    });
}

// =============================================================================
// Retry Scenarios
// =============================================================================

/// Transport failures retry on the injected clock with doubling delays
#[test]
fn test_dst_transport_failure_backoff() {
    run_scenario(|env| async move {
        let mut f = fixture(&env, supported())?;
        env.start(&f.manager)?;
        f.log.publish_snapshot(&f.manager, env.now_ms());
        env.check(&mut f.recorder, &f.manager, &f.log).await?;

        env.channel
            .fail(ChannelError::disconnected(LEADER_ID, "connection reset"))
            .expect("request in flight");
        let state = env.check(&mut f.recorder, &f.manager, &f.log).await?;
        assert_eq!(state.stats.failed_rpcs, 1);
        assert!(state.stats.retry_scheduled);
        assert_eq!(state.stats.consecutive_failures, 1);

        env.advance_time_ms(FIRST_RETRY_MS - 1);
        env.check(&mut f.recorder, &f.manager, &f.log).await?;
        assert_eq!(env.channel.sent_count(), 1);

        env.advance_time_ms(1);
        let state = env.check(&mut f.recorder, &f.manager, &f.log).await?;
        assert_eq!(env.channel.sent_count(), 2);
        assert!(!state.stats.retry_scheduled);

        // Second failure waits twice as long
        env.channel
            .fail(ChannelError::timeout(LEADER_ID, 30_000))
            .expect("request in flight");
        env.check(&mut f.recorder, &f.manager, &f.log).await?;
        env.advance_time_ms(2 * FIRST_RETRY_MS - 1);
        env.check(&mut f.recorder, &f.manager, &f.log).await?;
        assert_eq!(env.channel.sent_count(), 2);

        env.advance_time_ms(1);
        env.check(&mut f.recorder, &f.manager, &f.log).await?;
        assert_eq!(env.channel.sent_count(), 3);

        // Success resets the backoff
        env.channel
            .respond(ControllerRegistrationResponse::ok())
            .expect("request in flight");
        let state = env.check(&mut f.recorder, &f.manager, &f.log).await?;
        assert_eq!(state.stats.consecutive_failures, 0);
        assert_eq!(
            (state.stats.successful_rpcs, state.stats.failed_rpcs),
            (1, 2)
        );
        Ok(())
    });
}

/// Application errors other than UNSUPPORTED_VERSION retry on backoff
#[test]
fn test_dst_not_controller_retries() {
    run_scenario(|env| async move {
        let mut f = fixture(&env, supported())?;
        env.start(&f.manager)?;
        f.log.publish_snapshot(&f.manager, env.now_ms());
        env.check(&mut f.recorder, &f.manager, &f.log).await?;

        env.channel
            .respond(ControllerRegistrationResponse::with_error(
                ApiError::NotController,
                "leadership moved",
            ))
            .expect("request in flight");
        env.channel.set_leader(Some(env.node(LEADER_ID + 1)));

        let state = env.check(&mut f.recorder, &f.manager, &f.log).await?;
        assert!(state.stats.retry_scheduled);
        assert!(!state.stats.suspended);

        env.advance_time_ms(FIRST_RETRY_MS);
        env.check(&mut f.recorder, &f.manager, &f.log).await?;

        let sent = env.channel.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].target, env.node(LEADER_ID + 1));
        Ok(())
    });
}

/// No known leader counts as a failed attempt and retries
#[test]
fn test_dst_no_leader_counts_failure() {
    run_scenario(|env| async move {
        let mut f = fixture(&env, supported())?;
        env.channel.set_leader(None);
        env.start(&f.manager)?;
        f.log.publish_snapshot(&f.manager, env.now_ms());

        let state = env.check(&mut f.recorder, &f.manager, &f.log).await?;
        assert_eq!(state.stats.failed_rpcs, 1);
        assert_eq!(state.stats.pending_rpcs, 0);
        assert!(state.stats.retry_scheduled);
        assert_eq!(env.channel.sent_count(), 0);

        env.channel.set_leader(Some(env.node(LEADER_ID)));
        env.advance_time_ms(FIRST_RETRY_MS);
        let state = env.check(&mut f.recorder, &f.manager, &f.log).await?;
        assert_eq!(state.stats.pending_rpcs, 1);
        assert_eq!(env.channel.sent_count(), 1);
        Ok(())
    });
}

/// Every attempt reads the epoch supplier afresh
#[test]
fn test_dst_epoch_queried_per_attempt() {
    run_scenario(|env| async move {
        let mut f = fixture(&env, supported())?;
        env.set_controller_epoch(7);
        env.start(&f.manager)?;
        f.log.publish_snapshot(&f.manager, env.now_ms());
        env.check(&mut f.recorder, &f.manager, &f.log).await?;

        env.set_controller_epoch(8);
        env.channel
            .fail(ChannelError::disconnected(LEADER_ID, "reset"))
            .expect("request in flight");
        env.check(&mut f.recorder, &f.manager, &f.log).await?;
        env.advance_time_ms(FIRST_RETRY_MS);
        env.check(&mut f.recorder, &f.manager, &f.log).await?;

        let epochs: Vec<i32> = env
            .channel
            .sent()
            .iter()
            .map(|s| s.request.controller_epoch)
            .collect();
        assert_eq!(epochs, vec![7, 8]);
        Ok(())
    });
}

// =============================================================================
// Belief Scenarios
// =============================================================================

/// Re-publishing the confirming image changes nothing
#[test]
fn test_dst_confirming_snapshot_is_idempotent() {
    run_scenario(|env| async move {
        let mut f = fixture(&env, supported())?;
        env.start(&f.manager)?;
        f.log.publish_snapshot(&f.manager, env.now_ms());
        env.check(&mut f.recorder, &f.manager, &f.log).await?;
        let request = env
            .channel
            .respond(ControllerRegistrationResponse::ok())
            .expect("request outstanding");
        f.log.apply_registration(&f.manager, &request, env.now_ms());
        let before = env.check(&mut f.recorder, &f.manager, &f.log).await?;

        f.log.publish_snapshot(&f.manager, env.now_ms());
        f.log.publish_snapshot(&f.manager, env.now_ms());
        let after = env.check(&mut f.recorder, &f.manager, &f.log).await?;

        assert_eq!(before.stats, after.stats);
        assert_eq!(env.channel.sent_count(), 1);
        Ok(())
    });
}

/// Losing the record or the feature level clears the belief
#[test]
fn test_dst_belief_follows_log() {
    run_scenario(|env| async move {
        let mut f = fixture(&env, supported())?;
        env.start(&f.manager)?;
        f.log.publish_snapshot(&f.manager, env.now_ms());
        env.check(&mut f.recorder, &f.manager, &f.log).await?;
        let request = env
            .channel
            .respond(ControllerRegistrationResponse::ok())
            .expect("request outstanding");
        f.log.apply_registration(&f.manager, &request, env.now_ms());
        assert!(env.check(&mut f.recorder, &f.manager, &f.log).await?.stats.registered);

        // Downgrade: not registered, nothing sent
        f.log.set_metadata_version(&f.manager, unsupported(), env.now_ms());
        let state = env.check(&mut f.recorder, &f.manager, &f.log).await?;
        assert!(!state.stats.registered);
        assert_eq!(env.channel.sent_count(), 1);

        // Back up with the record still present: registered again without a send
        f.log.set_metadata_version(&f.manager, supported(), env.now_ms());
        let state = env.check(&mut f.recorder, &f.manager, &f.log).await?;
        assert!(state.stats.registered);
        assert_eq!(env.channel.sent_count(), 1);

        // Fenced out: register again
        f.log
            .remove_controller(&f.manager, f.manager.controller_id(), env.now_ms());
        let state = env.check(&mut f.recorder, &f.manager, &f.log).await?;
        assert!(!state.stats.registered);
        assert_eq!(state.stats.pending_rpcs, 1);
        assert_eq!(env.channel.sent_count(), 2);
        Ok(())
    });
}

/// A check returns only after the worker has sent for every queued update
#[test]
fn test_dst_check_orders_answers_after_sends() {
    run_scenario(|env| async move {
        let mut f = fixture(&env, supported())?;
        env.start(&f.manager)?;
        f.log.publish_snapshot(&f.manager, env.now_ms());

        for round in 1..=20u64 {
            env.check(&mut f.recorder, &f.manager, &f.log).await?;
            assert_eq!(env.channel.in_flight_count(), 1, "round {}", round);

            let request = env
                .channel
                .respond(ControllerRegistrationResponse::ok())
                .expect("request in flight");
            f.log.apply_registration(&f.manager, &request, env.now_ms());
            let state = env.check(&mut f.recorder, &f.manager, &f.log).await?;
            assert!(state.stats.registered);
            assert_eq!(state.stats.successful_rpcs, round);

            f.log
                .remove_controller(&f.manager, f.manager.controller_id(), env.now_ms());
        }
        Ok(())
    });
}

/// A record for another controller id does not affect us
#[test]
fn test_dst_other_controller_ignored() {
    run_scenario(|env| async move {
        let mut f = fixture(&env, supported())?;
        env.channel.set_leader(None);
        env.start(&f.manager)?;
        f.log.publish_snapshot(&f.manager, env.now_ms());
        let before = env.check(&mut f.recorder, &f.manager, &f.log).await?;

        let other = ControllerRegistrationRecord::from_identity(&env.identity(2));
        f.log.put_record(&f.manager, other, env.now_ms());

        let after = env.check(&mut f.recorder, &f.manager, &f.log).await?;
        assert_eq!(before.stats, after.stats);
        Ok(())
    });
}

// =============================================================================
// Close Scenarios
// =============================================================================

/// Close is idempotent, safe before start, and stops stats
#[test]
fn test_dst_close_before_start() {
    run_scenario(|env| async move {
        let f = fixture(&env, supported())?;
        f.manager.close();
        f.manager.close();

        assert!(matches!(
            f.manager.stats().await,
            Err(CoreError::ManagerClosed { .. })
        ));
        assert!(matches!(
            env.start(&f.manager),
            Err(CoreError::ManagerClosed { .. })
        ));
        Ok(())
    });
}

/// Late completions and armed retries are dropped after close
#[test]
fn test_dst_close_discards_late_work() {
    run_scenario(|env| async move {
        let mut f = fixture(&env, supported())?;
        env.start(&f.manager)?;
        f.log.publish_snapshot(&f.manager, env.now_ms());
        env.check(&mut f.recorder, &f.manager, &f.log).await?;
        env.channel
            .fail(ChannelError::disconnected(LEADER_ID, "reset"))
            .expect("request in flight");
        let state = env.check(&mut f.recorder, &f.manager, &f.log).await?;
        assert!(state.stats.retry_scheduled);

        f.manager.close();
        env.advance_time_ms(10 * FIRST_RETRY_MS);
        f.log.append_noop(&f.manager, env.now_ms());

        assert_eq!(env.channel.sent_count(), 1);
        assert!(f.manager.stats().await.is_err());
        f.manager.close();
        Ok(())
    });
}

/// A response arriving after close is discarded without panicking
#[test]
fn test_dst_completion_after_close() {
    run_scenario(|env| async move {
        let mut f = fixture(&env, supported())?;
        env.start(&f.manager)?;
        f.log.publish_snapshot(&f.manager, env.now_ms());
        env.check(&mut f.recorder, &f.manager, &f.log).await?;
        assert_eq!(env.channel.in_flight_count(), 1);

        f.manager.close();
        assert!(env
            .channel
            .respond(ControllerRegistrationResponse::ok())
            .is_some());
        assert!(f.manager.stats().await.is_err());
        Ok(())
    });
}

/// Requests are dispatched from the named event handler thread
#[test]
fn test_dst_requests_sent_from_event_handler() {
    run_scenario(|env| async move {
        let mut f = fixture(&env, supported())?;
        env.start(&f.manager)?;
        f.log.publish_snapshot(&f.manager, env.now_ms());
        env.check(&mut f.recorder, &f.manager, &f.log).await?;

        let sent = env.channel.sent();
        assert_eq!(
            sent[0].thread_name.as_deref(),
            Some("test-controller-registration-manager-event-handler")
        );
        assert_eq!(
            f.manager.thread_name(),
            "test-controller-registration-manager-event-handler"
        );
        Ok(())
    });
}
