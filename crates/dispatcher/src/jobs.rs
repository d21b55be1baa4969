//! 内置任务

use rand::distr::Alphanumeric;
use rand::Rng;
use tracing::info;

use crate::registry::JobRegistry;

pub const GENERATE_RANDOM_STRING: &str = "generate_random_string";
pub const GENERATE_RANDOM_NUMBER: &str = "generate_random_number";

pub fn random_string(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

pub fn random_number() -> u32 {
    rand::rng().random_range(0..100)
}

pub async fn generate_random_string() {
    let value = random_string(10);
    info!(job = GENERATE_RANDOM_STRING, value = %value, "生成随机字符串");
}

pub async fn generate_random_number() {
    let value = random_number();
    info!(job = GENERATE_RANDOM_NUMBER, value = value, "生成随机数");
}

/// 包含全部内置任务的注册表
pub fn builtin_registry() -> JobRegistry {
    JobRegistry::builder()
        .register(GENERATE_RANDOM_STRING, generate_random_string)
        .register(GENERATE_RANDOM_NUMBER, generate_random_number)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_string_is_alphanumeric() {
        let value = random_string(10);
        assert_eq!(value.len(), 10);
        assert!(value.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_random_number_range() {
        for _ in 0..1000 {
            assert!(random_number() < 100);
        }
    }

    #[tokio::test]
    async fn test_builtin_registry() {
        let registry = builtin_registry();
        assert_eq!(
            registry.names(),
            vec![
                GENERATE_RANDOM_NUMBER.to_string(),
                GENERATE_RANDOM_STRING.to_string()
            ]
        );
        for name in registry.names() {
            let job = registry.get(&name).unwrap();
            job().await;
        }
    }
}
