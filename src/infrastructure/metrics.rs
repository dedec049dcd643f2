// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::config::settings::MetricsSettings;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{info, warn};

/// 安装 Prometheus 导出器
///
/// 地址无效或端口被占用时只记录警告，服务照常启动。
pub fn init_metrics(settings: &MetricsSettings) {
    if !settings.enabled {
        info!("Metrics exporter disabled");
        return;
    }

    let addr: SocketAddr = match settings.listen_addr.parse() {
        Ok(addr) => addr,
        Err(e) => {
            warn!("Invalid metrics address {}: {}", settings.listen_addr, e);
            return;
        }
    };

    if let Err(e) = PrometheusBuilder::new().with_http_listener(addr).install() {
        warn!(
            "Failed to install Prometheus recorder: {}. This might happen if the port is already in use.",
            e
        );
        return;
    }

    describe_metrics();
    info!("Metrics exporter listening on {}", addr);
}

fn describe_metrics() {
    metrics::describe_counter!("tasks_enqueued_total", "Generation tasks accepted into the queue");
    metrics::describe_counter!("tasks_completed_total", "Generation tasks finished successfully");
    metrics::describe_counter!("tasks_failed_total", "Generation tasks that ended in error");
    metrics::describe_counter!(
        "tasks_reclaimed_total",
        "Tasks reclaimed from processing after the timeout threshold"
    );
    metrics::describe_counter!("llm_attempts_total", "Model invocations by output strategy");
    metrics::describe_gauge!("scheduler_ready_tasks", "Tasks waiting in the in-memory ready set");
}
