//! Per-client service task.
//!
//! One thread per adopted client: pop a request, consult the decision
//! policy, push the verdict. The pop is a pause-spin busy wait — the
//! sub-microsecond request/response path — broken only by the shutdown
//! flags or the worker detaching.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::reactor::ClientRecord;
use crate::config::{CONNECTED_RECHECK_ITERS, MSG_CAPACITY, RESPONSE_PUSH_TIMEOUT_MS};
use crate::logging::SessionLogger;
use crate::policy::DecisionPolicy;
use crate::wire::{Request, Response};

pub(crate) struct ServiceContext {
    pub record: Arc<ClientRecord>,
    pub policy: Arc<dyn DecisionPolicy>,
    pub logger: Arc<SessionLogger>,
    pub running: Arc<AtomicBool>,
}

pub(crate) fn run(ctx: ServiceContext) {
    let record = &ctx.record;
    let channel = record.channel();

    let session_id = ctx.logger.next_session_id();
    let client_key = format!("{}:{}", record.client_type, record.unique_id);
    let log_key = record.channel_name.clone();
    ctx.logger.record_connection(&client_key);
    ctx.logger.write_channel(
        &format!("[ksched] session #{session_id} started for {client_key} (shm: {log_key})"),
        &log_key,
    );
    log::info!("session #{session_id} started for {client_key}");

    channel.set_server_ready(true);

    let mut buf = [0u8; MSG_CAPACITY];
    'session: loop {
        let len = 'pop: {
            let mut pauses: u64 = 0;
            loop {
                if !ctx.running.load(Ordering::Acquire) || !record.is_running() {
                    break 'session;
                }
                if let Some(len) = channel.request_ring().try_pop(&mut buf) {
                    break 'pop len;
                }
                pauses += 1;
                if pauses % CONNECTED_RECHECK_ITERS == 0 && !channel.is_client_connected() {
                    break 'session;
                }
                std::hint::spin_loop();
            }
        };

        let text = match std::str::from_utf8(&buf[..len]) {
            Ok(t) => t,
            Err(_) => {
                ctx.logger.write_channel(
                    &format!("[ksched] dropping non-UTF8 record ({len} bytes) from {client_key}"),
                    &log_key,
                );
                continue;
            }
        };

        // Malformed records are dropped without a response
        let request = match Request::parse(text) {
            Ok(r) => r,
            Err(e) => {
                ctx.logger.write_channel(&format!("[ksched] {e}"), &log_key);
                continue;
            }
        };

        let kernel_id = ctx.logger.next_kernel_id();
        ctx.logger.record_kernel(&request.kernel_type);
        if kernel_id <= 10 || kernel_id % 100 == 0 {
            ctx.logger.write_channel(
                &format!(
                    "Kernel {kernel_id} arrived: {}|{} from {}",
                    request.kernel_type, request.request_id, request.source_tag
                ),
                &log_key,
            );
        }

        let decision = ctx.policy.decide(&request.kernel_type);
        let response = Response {
            request_id: request.request_id,
            allowed: decision.allowed,
            reason: decision.reason,
        };
        if channel
            .response_ring()
            .push_blocking(response.format().as_bytes(), RESPONSE_PUSH_TIMEOUT_MS)
            .is_err()
        {
            // The worker is stuck; liveness is re-evaluated next iteration
            ctx.logger.write_channel(
                &format!("[ksched] response send timeout for {client_key}"),
                &log_key,
            );
        }
        record.touch();
    }

    ctx.logger
        .write_channel(&format!("[ksched] session #{session_id} ended ({client_key})"), &log_key);
    log::info!("session #{session_id} ended ({client_key})");
}
