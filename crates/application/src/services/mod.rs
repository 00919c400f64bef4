mod account_service;

pub use account_service::{
    AccountService, AccountServiceDependencies, Authentication, BanUserRequest, ComponentHealth,
    HealthReport, RegisterUserRequest, UpdateUserRequest, MAX_EMAIL_LENGTH, MAX_PASSWORD_LENGTH,
    MIN_EMAIL_LENGTH, MIN_PASSWORD_LENGTH,
};
