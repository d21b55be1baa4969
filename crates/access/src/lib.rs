//! 用户、角色与权限之间的关联解析

pub mod resolver;
pub mod seeder;

pub use resolver::PermissionResolver;
pub use seeder::{ReferenceSeeder, RoleSeed, SeedPlan, SeedReport, UserSeed, ValueGroupSeed};
