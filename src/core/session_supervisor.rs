//! 运行监管：取消管理
//!
//! 持有根 CancellationToken；每次运行获得一个子 token，cancel_all 会连带取消所有进行中的运行。

use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub struct RunSupervisor {
    root: CancellationToken,
}

impl RunSupervisor {
    pub fn new() -> Self {
        Self {
            root: CancellationToken::new(),
        }
    }

    /// 为单次运行创建子 token
    pub fn child_token(&self) -> CancellationToken {
        self.root.child_token()
    }

    /// 取消所有进行中的运行；之后提交的运行也会立即被取消
    pub fn cancel_all(&self) {
        self.root.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.root.is_cancelled()
    }
}

impl Default for RunSupervisor {
    fn default() -> Self {
        Self::new()
    }
}
