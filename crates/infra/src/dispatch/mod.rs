//! Asynchronous dispatch of accepted push notifications

pub mod notification_worker;

pub use notification_worker::{
    DispatchError, NotificationQueue, NotificationWorker, NotificationWorkerConfig,
};
