use std::time::Duration;

use crate::errors::Error;
use crate::task::TaskInfo;

/// Receives every exception the engine swallows. The engine never looks at what
/// these callbacks do, the default implementations just log.
pub trait ExceptionHandler: Send + Sync {
    fn on_disk_cache_open_exception(&self, err: &failure::Error) {
        error!("Disk cache open failed, disk cache disabled. {}", err);
    }

    fn on_disk_cache_read_exception(&self, info: &TaskInfo, err: &failure::Error) {
        warn!("Disk cache read failed, task: {}. {}", info, err);
    }

    fn on_disk_cache_write_exception(&self, info: &TaskInfo, err: &failure::Error) {
        warn!("Disk cache write failed, task: {}. {}", info, err);
    }

    fn on_disk_cache_common_exception(&self, err: &failure::Error) {
        warn!("Disk cache exception. {}", err);
    }

    fn on_local_disk_load_not_exists_exception(&self, info: &TaskInfo, err: &failure::Error) {
        warn!("Local source does not exist, task: {}. {}", info, err);
    }

    fn on_local_disk_load_common_exception(&self, info: &TaskInfo, err: &failure::Error) {
        warn!("Local source load failed, task: {}. {}", info, err);
    }

    fn on_network_load_exception(&self, info: &TaskInfo, err: &failure::Error) {
        warn!("Network load failed, task: {}. {}", info, err);
    }

    fn on_decode_exception(&self, info: &TaskInfo, err: &failure::Error) {
        warn!("Decode failed, task: {}. {}", info, err);
    }

    fn on_image_data_length_out_of_limit_exception(&self, info: &TaskInfo, length: u64, limit: u64) {
        let err = Error::LengthOutOfLimit(length, limit);
        warn!("{} Task: {}.", err, info);
    }

    fn on_memory_buffer_length_out_of_limit_exception(
        &self,
        info: &TaskInfo,
        length: u64,
        limit: u64,
    ) {
        warn!(
            "Memory buffer length {} is out of limit {}, task: {}.",
            length, limit, info
        );
    }

    fn on_http_content_range_parse_exception(&self, info: &TaskInfo, err: &failure::Error) {
        warn!("Content-Range parse failed, task: {}. {}", info, err);
    }

    fn handle_low_network_speed_event(&self, info: &TaskInfo, elapsed: Duration, speed: u64) {
        warn!(
            "Network speed {}B/s is too low after {:?}, canceled. task: {}.",
            speed, elapsed, info
        );
    }

    fn on_memory_cache_common_exception(&self, err: &failure::Error) {
        warn!("Memory cache exception. {}", err);
    }
}

/// Logs every exception through the `log` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogExceptionHandler;

impl ExceptionHandler for LogExceptionHandler {}
