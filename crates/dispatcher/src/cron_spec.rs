use std::str::FromStr;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use cron::Schedule;
use keel_errors::{KeelError, KeelResult};

/// 解析后的调度表达式
///
/// 支持的写法：
/// - `@every 1m30s` 固定间隔，单位 `ms`、`s`、`m`、`h`
/// - `@yearly`、`@monthly`、`@weekly`、`@daily`、`@hourly` 等描述符
/// - 5 段表达式（分钟精度，秒固定为 0）
/// - 6/7 段表达式（含秒，可选年份）
#[derive(Debug, Clone)]
pub enum CronSpec {
    Every(StdDuration),
    Calendar(Box<Schedule>),
}

impl CronSpec {
    pub fn parse(expr: &str) -> KeelResult<Self> {
        let trimmed = expr.trim();
        if trimmed.is_empty() {
            return Err(KeelError::invalid_cron(expr, "表达式不能为空"));
        }

        if let Some(rest) = trimmed.strip_prefix("@every") {
            let interval =
                parse_interval(rest.trim()).map_err(|msg| KeelError::invalid_cron(expr, msg))?;
            return Ok(CronSpec::Every(interval));
        }

        let normalized = match trimmed {
            "@yearly" | "@annually" => "0 0 0 1 1 *".to_string(),
            "@monthly" => "0 0 0 1 * *".to_string(),
            "@weekly" => "0 0 0 * * SUN".to_string(),
            "@daily" | "@midnight" => "0 0 0 * * *".to_string(),
            "@hourly" => "0 0 * * * *".to_string(),
            other if other.starts_with('@') => {
                return Err(KeelError::invalid_cron(expr, format!("未知的描述符: {other}")));
            }
            other => match other.split_whitespace().count() {
                5 => format!("0 {other}"),
                6 | 7 => other.to_string(),
                n => {
                    return Err(KeelError::invalid_cron(
                        expr,
                        format!("字段数量应为5、6或7，实际为{n}"),
                    ))
                }
            },
        };

        let schedule = Schedule::from_str(&normalized)
            .map_err(|e| KeelError::invalid_cron(expr, e.to_string()))?;
        Ok(CronSpec::Calendar(Box::new(schedule)))
    }

    /// 验证表达式是否可被运行时接受
    pub fn validate(expr: &str) -> KeelResult<()> {
        Self::parse(expr).map(|_| ())
    }

    /// 严格晚于 `from` 的下一次触发时间
    pub fn next_after(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            CronSpec::Every(interval) => Duration::from_std(*interval)
                .ok()
                .and_then(|step| from.checked_add_signed(step)),
            CronSpec::Calendar(schedule) => schedule.after(&from).next(),
        }
    }

    pub fn upcoming(&self, from: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        let mut times = Vec::with_capacity(count);
        let mut cursor = from;
        while times.len() < count {
            match self.next_after(cursor) {
                Some(next) => {
                    times.push(next);
                    cursor = next;
                }
                None => break,
            }
        }
        times
    }

    /// 执行频率的简短描述
    pub fn frequency_description(&self) -> String {
        let upcoming = self.upcoming(Utc::now(), 2);
        if upcoming.len() < 2 {
            return "无法确定频率".to_string();
        }
        let interval = upcoming[1] - upcoming[0];
        match interval.num_milliseconds() {
            ms if ms < 1000 => format!("每{ms}毫秒"),
            ms => match ms / 1000 {
                s if s < 60 => format!("每{s}秒"),
                s if s < 3600 => format!("每{}分钟", s / 60),
                s if s < 86400 => format!("每{}小时", s / 3600),
                s if s < 604800 => format!("每{}天", s / 86400),
                s => format!("每{}周", s / 604800),
            },
        }
    }
}

impl FromStr for CronSpec {
    type Err = KeelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// 解析 `1h30m`、`500ms` 这样的间隔，结果必须大于零
fn parse_interval(input: &str) -> Result<StdDuration, String> {
    if input.is_empty() {
        return Err("@every 缺少时间间隔".to_string());
    }

    let mut total = StdDuration::ZERO;
    let mut chars = input.chars().peekable();
    while chars.peek().is_some() {
        let mut digits = String::new();
        while let Some(c) = chars.peek().copied().filter(char::is_ascii_digit) {
            digits.push(c);
            chars.next();
        }
        let mut unit = String::new();
        while let Some(c) = chars.peek().copied().filter(char::is_ascii_alphabetic) {
            unit.push(c);
            chars.next();
        }
        if digits.is_empty() || unit.is_empty() {
            return Err(format!("无效的时间间隔: {input}"));
        }

        let value: u64 = digits
            .parse()
            .map_err(|_| format!("时间间隔数值过大: {digits}"))?;
        let part = match unit.as_str() {
            "ms" => StdDuration::from_millis(value),
            "s" => StdDuration::from_secs(value),
            "m" => StdDuration::from_secs(value.saturating_mul(60)),
            "h" => StdDuration::from_secs(value.saturating_mul(3600)),
            other => return Err(format!("未知的时间单位: {other}")),
        };
        total = total.saturating_add(part);
    }

    if total.is_zero() {
        return Err("时间间隔必须大于0".to_string());
    }
    Ok(total)
}
