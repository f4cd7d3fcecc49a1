use futures::{StreamExt, stream};
use std::future::Future;

/// 以受限并发度执行一组异步任务，返回与输入同序的结果列表
///
/// 并发原语的意义在于让网络等待真正重叠：LLM调用与工具调用都是I/O挂起点，
/// 计算量相对可忽略。这里使用`buffered`保持输出顺序与输入一致，便于调用方
/// 将结果与任务一一对应。
pub async fn do_parallel_with_limit<F, T>(futures: Vec<F>, limit: usize) -> Vec<T>
where
    F: Future<Output = T>,
{
    stream::iter(futures)
        .buffered(limit.max(1))
        .collect::<Vec<T>>()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_results_preserve_input_order() {
        let futures: Vec<_> = (0..8u64)
            .map(|i| async move {
                // 逆序的延迟，验证完成顺序不影响输出顺序
                tokio::time::sleep(Duration::from_millis(8 - i)).await;
                i * 10
            })
            .collect();

        let results = do_parallel_with_limit(futures, 4).await;
        assert_eq!(results, vec![0, 10, 20, 30, 40, 50, 60, 70]);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let futures: Vec<_> = (0..10)
            .map(|_| {
                let in_flight = in_flight.clone();
                let peak = peak.clone();
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                }
            })
            .collect();

        do_parallel_with_limit(futures, 3).await;
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_zero_limit_is_clamped() {
        let futures: Vec<_> = (0..2).map(|i| async move { i }).collect();
        let results = do_parallel_with_limit(futures, 0).await;
        assert_eq!(results.len(), 2);
    }
}
