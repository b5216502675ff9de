//! 同步标记（sync marker）的线上格式。
//!
//! # 模块定位（Why）
//! - UDP 不保留帧边界，丢包后接收方无法得知下一个报文属于哪一帧的哪个位置；
//! - 输入侧每隔 `frames_per_sync` 帧、输出侧（设备固件）在帧首报文前部放置一个定长标记，接收方据此检测丢包并重新对齐。
//!
//! # 线上格式（What）
//! ```text
//! 0               4               8                  sync_size
//! +---------------+---------------+------ ... --------+
//! | barker (BE)   | index (BE)    | reserved (zero)   |
//! +---------------+---------------+------ ... --------+
//! ```
//! - `barker` 固定为 [`SYNC_MARKER_BARKER`]，标记只在报文起始位置被识别；
//! - `index` 单调递增，在 2^32 处回绕；接收侧以 [`NO_SYNC_OBSERVED`] 作为“尚未见到标记”的哨兵，
//!   使首个真实序号 `0` 被视为期望值。

use bytes::{Buf, BufMut};

/// 标记签名，网络字节序写出。
pub const SYNC_MARKER_BARKER: u32 = 0x5A5A_A5A5;

/// 标记头的最小长度：签名与序号各 4 字节。
pub const SYNC_MARKER_MIN_SIZE: usize = 8;

/// 接收侧“尚未见到标记”的哨兵值。
pub const NO_SYNC_OBSERVED: u32 = u32::MAX;

/// 一个同步标记。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SyncMarker {
    index: u32,
}

impl SyncMarker {
    pub const fn new(index: u32) -> Self {
        Self { index }
    }

    pub const fn index(&self) -> u32 {
        self.index
    }

    /// 以 `sync_size` 字节写出标记，超出最小长度的部分填零。
    ///
    /// # 前置条件
    /// - `sync_size >= SYNC_MARKER_MIN_SIZE`，由配置校验保证。
    pub fn encode<B: BufMut>(&self, dst: &mut B, sync_size: usize) {
        debug_assert!(sync_size >= SYNC_MARKER_MIN_SIZE);
        dst.put_u32(SYNC_MARKER_BARKER);
        dst.put_u32(self.index);
        dst.put_bytes(0, sync_size.saturating_sub(SYNC_MARKER_MIN_SIZE));
    }

    /// 若 `payload` 以标记开头则解析之。
    ///
    /// 只做结构识别：长度不小于 `sync_size` 且前 4 字节等于签名。保留字节不参与判断。
    pub fn decode(payload: &[u8], sync_size: usize) -> Option<Self> {
        if sync_size < SYNC_MARKER_MIN_SIZE || payload.len() < sync_size {
            return None;
        }
        let mut header = &payload[..SYNC_MARKER_MIN_SIZE];
        if header.get_u32() != SYNC_MARKER_BARKER {
            return None;
        }
        Some(Self::new(header.get_u32()))
    }

    /// 紧随其后的期望序号。
    pub const fn successor(index: u32) -> u32 {
        index.wrapping_add(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn encode_writes_big_endian_barker_index_and_zero_padding() {
        let mut buf = BytesMut::new();
        SyncMarker::new(0x0102_0304).encode(&mut buf, 12);
        assert_eq!(
            &buf[..],
            &[0x5A, 0x5A, 0xA5, 0xA5, 0x01, 0x02, 0x03, 0x04, 0, 0, 0, 0]
        );
        assert_eq!(SyncMarker::decode(&buf, 12), Some(SyncMarker::new(0x0102_0304)));
    }

    #[test]
    fn decode_requires_barker_at_payload_start() {
        let mut buf = BytesMut::new();
        buf.put_u8(0);
        SyncMarker::new(1).encode(&mut buf, 8);
        assert_eq!(SyncMarker::decode(&buf, 8), None);
        assert_eq!(SyncMarker::decode(&buf[1..], 8), Some(SyncMarker::new(1)));
    }

    #[test]
    fn decode_rejects_truncated_headers() {
        let mut buf = BytesMut::new();
        SyncMarker::new(7).encode(&mut buf, 16);
        assert_eq!(SyncMarker::decode(&buf[..15], 16), None);
        assert_eq!(SyncMarker::decode(&buf, 4), None);
    }

    #[test]
    fn sentinel_successor_is_zero() {
        assert_eq!(SyncMarker::successor(NO_SYNC_OBSERVED), 0);
        assert_eq!(SyncMarker::successor(41), 42);
    }
}
