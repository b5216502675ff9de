//! Linux `tc` 流量整形。
//!
//! # 模块定位（Why）
//! - 以太网输入流可以把限速交给内核：在出口网卡上挂 HTB 根队列，为设备端口建一个限速 class，再用 u32 过滤器把
//!   目的端口匹配的报文导入该 class；未匹配的流量不受影响。
//!
//! # 规则布局（What）
//! - 根队列：`1:`（HTB，无默认 class，未分类流量直通）；
//! - 每端口 class：`1:<port 十六进制>`，速率为 `bytes_per_sec * 8` bit；
//! - 每端口过滤器：`prio = port`，拆除时按优先级整体删除。
//!
//! # 并发（How）
//! - 进程级注册表按网卡保存已安装的端口集合，安装/拆除持有该网卡的锁串行执行；
//! - 根队列随首条规则创建、随最后一条规则删除。

use std::{
    collections::{HashMap, HashSet},
    process::Command,
    sync::{Arc, OnceLock},
};

use ethlink_transport::{ShapingError, ShapingHandle, TrafficShaper};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

/// 执行一条 `tc` 命令的抽象，参数不含程序名。
pub trait TcCommandRunner: Send + Sync {
    /// 执行 `tc <args>`，非零退出码视为失败。
    fn run(&self, args: &[String]) -> Result<(), ShapingError>;

    /// 当前主机能否执行 `tc`。
    fn probe(&self) -> bool;
}

/// 通过 `std::process::Command` 调用系统 `tc`。
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemCommandRunner;

impl TcCommandRunner for SystemCommandRunner {
    fn run(&self, args: &[String]) -> Result<(), ShapingError> {
        let output = Command::new("tc").args(args).output()?;
        if output.status.success() {
            return Ok(());
        }
        Err(ShapingError::Command {
            command: format!("tc {}", args.join(" ")),
            detail: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        })
    }

    fn probe(&self) -> bool {
        cfg!(target_os = "linux")
            && Command::new("tc")
                .arg("-V")
                .output()
                .map(|output| output.status.success())
                .unwrap_or(false)
    }
}

/// 运行期能力查询：当前主机是否支持内核整形。
pub fn shaping_available() -> bool {
    SystemCommandRunner.probe()
}

#[derive(Debug, Default)]
struct InterfaceRules {
    ports: HashSet<u16>,
}

type Registry = Mutex<HashMap<String, Arc<Mutex<InterfaceRules>>>>;

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

fn interface_rules(interface: &str) -> Arc<Mutex<InterfaceRules>> {
    registry()
        .lock()
        .entry(interface.to_owned())
        .or_default()
        .clone()
}

fn tc(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|part| (*part).to_owned()).collect()
}

/// 基于 `tc` 的 [`TrafficShaper`] 实现。
#[derive(Debug, Default)]
pub struct TcShaper<R = SystemCommandRunner> {
    runner: R,
}

impl TcShaper {
    /// 使用系统 `tc`。
    pub fn system() -> Self {
        Self {
            runner: SystemCommandRunner,
        }
    }
}

impl<R: TcCommandRunner> TcShaper<R> {
    /// 使用自定义命令执行器。
    pub fn with_runner(runner: R) -> Self {
        Self { runner }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    fn add_rule(&self, interface: &str, port: u16, bytes_per_sec: u32) -> Result<(), ShapingError> {
        let classid = format!("1:{port:x}");
        let rate = format!("{}bit", u64::from(bytes_per_sec) * 8);
        let prio = port.to_string();
        self.runner.run(&tc(&[
            "class", "add", "dev", interface, "parent", "1:", "classid", &classid, "htb", "rate",
            &rate,
        ]))?;
        let filter = self.runner.run(&tc(&[
            "filter", "add", "dev", interface, "protocol", "ip", "parent", "1:", "prio", &prio,
            "u32", "match", "ip", "dport", &prio, "0xffff", "flowid", &classid,
        ]));
        if let Err(err) = filter {
            if let Err(rollback) = self
                .runner
                .run(&tc(&["class", "del", "dev", interface, "classid", &classid]))
            {
                warn!(interface, port, error = %rollback, "failed to roll back tc class");
            }
            return Err(err);
        }
        Ok(())
    }
}

impl<R: TcCommandRunner> TrafficShaper for TcShaper<R> {
    fn is_available(&self) -> bool {
        self.runner.probe()
    }

    fn install_rate_limit(
        &self,
        interface: &str,
        port: u16,
        bytes_per_sec: u32,
    ) -> Result<ShapingHandle, ShapingError> {
        if !self.is_available() {
            return Err(ShapingError::NotSupported {
                reason: "`tc` is not available".to_owned(),
            });
        }
        let slot = interface_rules(interface);
        let mut rules = slot.lock();
        if rules.ports.contains(&port) {
            return Err(ShapingError::AlreadyInstalled {
                interface: interface.to_owned(),
                port,
            });
        }

        let first_rule = rules.ports.is_empty();
        if first_rule {
            self.runner.run(&tc(&[
                "qdisc", "add", "dev", interface, "root", "handle", "1:", "htb",
            ]))?;
        }
        if let Err(err) = self.add_rule(interface, port, bytes_per_sec) {
            if first_rule {
                if let Err(rollback) = self
                    .runner
                    .run(&tc(&["qdisc", "del", "dev", interface, "root"]))
                {
                    warn!(interface, error = %rollback, "failed to roll back tc root qdisc");
                }
            }
            return Err(err);
        }
        rules.ports.insert(port);
        info!(interface, port, bytes_per_sec, "traffic control rate limit installed");
        Ok(ShapingHandle::new(interface, port, bytes_per_sec))
    }

    fn remove_rate_limit(&self, handle: &ShapingHandle) -> Result<(), ShapingError> {
        let interface = handle.interface();
        let port = handle.port();
        let slot = interface_rules(interface);
        let mut rules = slot.lock();
        if !rules.ports.remove(&port) {
            debug!(%handle, "traffic control rule already removed");
            return Ok(());
        }

        let classid = format!("1:{port:x}");
        let prio = port.to_string();
        let mut first_error = None;
        let mut steps = vec![
            tc(&["filter", "del", "dev", interface, "parent", "1:", "prio", &prio]),
            tc(&["class", "del", "dev", interface, "classid", &classid]),
        ];
        if rules.ports.is_empty() {
            steps.push(tc(&["qdisc", "del", "dev", interface, "root"]));
        }
        for step in steps {
            if let Err(err) = self.runner.run(&step) {
                warn!(%handle, error = %err, "traffic control teardown step failed");
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => {
                info!(%handle, "traffic control rate limit removed");
                Ok(())
            }
        }
    }
}
