// 进度回调
//
// 每个步骤在每个工作单元（每首锚定歌曲、每个变调任务、每个配对）开始前汇报
// (当前进度, 总数, 消息)，回调返回 false 即表示取消，步骤停止派发新工作并返回已完成的部分。

/// 进度回调类型：(当前进度, 总数, 消息) -> 是否继续
pub type ProgressFn<'a> = dyn FnMut(usize, usize, &str) -> bool + 'a;

/// 可选的进度回调
pub struct Progress<'a> {
    callback: Option<&'a mut ProgressFn<'a>>,
    cancelled: bool,
}

impl<'a> Progress<'a> {
    pub fn new(callback: &'a mut ProgressFn<'a>) -> Self {
        Self { callback: Some(callback), cancelled: false }
    }

    /// 不汇报进度、永不取消
    pub fn none() -> Self {
        Self { callback: None, cancelled: false }
    }

    /// 汇报进度，返回是否继续
    pub fn report(&mut self, current: usize, total: usize, message: &str) -> bool {
        let keep_going = match self.callback.as_mut() {
            Some(cb) => cb(current, total, message),
            None => true,
        };
        if !keep_going {
            self.cancelled = true;
        }
        keep_going
    }

    /// 回调是否曾经要求取消
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_always_continues() {
        let mut progress = Progress::none();
        assert!(progress.report(1, 1, "x"));
    }

    #[test]
    fn test_callback_can_cancel() {
        let mut seen = Vec::new();
        let mut cb = |current: usize, _total: usize, _msg: &str| {
            seen.push(current);
            current < 2
        };
        let mut progress = Progress::new(&mut cb);
        assert!(progress.report(1, 3, "a"));
        assert!(!progress.is_cancelled());
        assert!(!progress.report(2, 3, "b"));
        assert!(progress.is_cancelled());
        drop(progress);
        assert_eq!(seen, vec![1, 2]);
    }
}
