//! 订单处理上下文
//!
//! 封装"我正在处理第几个订单、订单号是什么"这一信息

use std::fmt::Display;

use crate::models::OrderId;

/// 订单处理上下文
#[derive(Debug, Clone)]
pub struct OrderCtx {
    pub order_id: OrderId,

    /// 在列表中的位置（从1开始，仅用于日志显示）
    pub index: usize,

    pub total: usize,
}

impl OrderCtx {
    pub fn new(order_id: OrderId, index: usize, total: usize) -> Self {
        Self {
            order_id,
            index,
            total,
        }
    }

    pub fn is_last(&self) -> bool {
        self.index >= self.total
    }
}

impl Display for OrderCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[订单 {}/{} {}]", self.index, self.total, self.order_id)
    }
}
