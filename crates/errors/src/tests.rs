use crate::*;

#[test]
fn test_keel_error_display() {
    let err = KeelError::persistence("connection reset");
    assert_eq!(err.to_string(), "持久化失败: connection reset");

    let err = KeelError::unknown_job("send_mail");
    assert_eq!(err.to_string(), "未知的任务名称: send_mail");

    let err = KeelError::already_running("generate_random_string");
    assert_eq!(err.to_string(), "任务已在运行: generate_random_string");

    let err = KeelError::EmptyRoleSet { user_id: 7 };
    assert_eq!(err.to_string(), "用户 7 的角色列表不能为空");

    let err = KeelError::invalid_cron("* *", "too few fields");
    assert_eq!(err.to_string(), "无效的CRON表达式: * * - too few fields");

    assert_eq!(KeelError::Cancelled.to_string(), "操作已取消");
}

#[test]
fn test_error_kind_mapping() {
    assert_eq!(KeelError::schedule_not_found("a").kind(), ErrorKind::NotFound);
    assert_eq!(KeelError::not_found("group").kind(), ErrorKind::NotFound);
    assert_eq!(KeelError::already_running("a").kind(), ErrorKind::AlreadyExists);
    assert_eq!(KeelError::unknown_job("a").kind(), ErrorKind::InvalidInput);
    assert_eq!(KeelError::invalid_cron("x", "y").kind(), ErrorKind::InvalidInput);
    assert_eq!(KeelError::EmptyRoleSet { user_id: 1 }.kind(), ErrorKind::InvalidInput);
    assert_eq!(KeelError::persistence("x").kind(), ErrorKind::PersistenceFailed);
    assert_eq!(KeelError::Cancelled.kind(), ErrorKind::Cancelled);
    assert_eq!(KeelError::Internal("x".into()).kind(), ErrorKind::Internal);
}

#[test]
fn test_from_conversions() {
    let err: KeelError = sqlx::Error::PoolTimedOut.into();
    assert!(matches!(err, KeelError::Persistence(_)));

    let json_err = serde_json::from_str::<serde_json::Value>("{invalid").unwrap_err();
    let err: KeelError = json_err.into();
    assert!(matches!(err, KeelError::Serialization(_)));

    let err: KeelError = anyhow::anyhow!("boom").into();
    assert_eq!(err.to_string(), "内部错误: boom");
}
