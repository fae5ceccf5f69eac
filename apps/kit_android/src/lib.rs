//! Kit Android JNI 辅助
//!
//! 供 `com.kit.player.AndroidHelper` 调用：初始化日志、管理全局对象引用、
//! 持有应用 Context 的全局引用。

use std::sync::OnceLock;

use jni::objects::{GlobalRef, JClass, JObject};
use jni::sys::{jlong, jobject};
use jni::JNIEnv;

/// 初始化日志（Android）
#[cfg(target_os = "android")]
fn init_logging() {
    android_logger::init_once(
        android_logger::Config::default()
            .with_max_level(log::LevelFilter::Debug)
            .with_tag("KitPlayer"),
    );
}

#[cfg(not(target_os = "android"))]
fn init_logging() {}

/// 应用 Context 的全局引用，在进程内一直有效，直到被替换
static APPLICATION_CONTEXT: OnceLock<parking_lot::Mutex<Option<GlobalRef>>> = OnceLock::new();

fn context_slot() -> &'static parking_lot::Mutex<Option<GlobalRef>> {
    APPLICATION_CONTEXT.get_or_init(|| parking_lot::Mutex::new(None))
}

/// JNI: 初始化库
#[no_mangle]
pub extern "system" fn Java_com_kit_player_AndroidHelper_init(_env: JNIEnv, _class: JClass) {
    init_logging();
}

/// JNI: 为对象创建全局引用，返回原始引用值
///
/// @return 0 表示失败
#[no_mangle]
pub extern "system" fn Java_com_kit_player_AndroidHelper_newGlobalObjectRef<'local>(
    env: JNIEnv<'local>,
    _class: JClass<'local>,
    obj: JObject<'local>,
) -> jlong {
    if obj.is_null() {
        return 0;
    }
    match env.new_global_ref(&obj) {
        Ok(global) => {
            let raw = global.as_obj().as_raw();
            // 由 deleteGlobalObjectRef 释放
            std::mem::forget(global);
            raw as jlong
        }
        Err(e) => {
            log::error!("NewGlobalRef failed: {}", e);
            0
        }
    }
}

/// JNI: 释放 `newGlobalObjectRef` 返回的引用
#[no_mangle]
pub extern "system" fn Java_com_kit_player_AndroidHelper_deleteGlobalObjectRef<'local>(
    env: JNIEnv<'local>,
    _class: JClass<'local>,
    reference: jlong,
) {
    if reference == 0 {
        return;
    }
    let raw_env = env.get_raw();
    // reference 来自 newGlobalObjectRef，调用方保证只释放一次
    unsafe {
        if let Some(delete) = (**raw_env).DeleteGlobalRef {
            delete(raw_env, reference as jobject);
        }
    }
}

/// JNI: 保存应用 Context
#[no_mangle]
pub extern "system" fn Java_com_kit_player_AndroidHelper_setApplicationContextNative<'local>(
    env: JNIEnv<'local>,
    _class: JClass<'local>,
    context: JObject<'local>,
) {
    let global = if context.is_null() {
        None
    } else {
        match env.new_global_ref(&context) {
            Ok(global) => Some(global),
            Err(e) => {
                log::error!("failed to keep application context: {}", e);
                return;
            }
        }
    };
    // 旧的全局引用在这里被释放
    *context_slot().lock() = global;
    log::debug!("application context updated");
}
