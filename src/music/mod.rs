// 乐理模块
//
// 子模块：
// - key: 调号解析、音级圆周距离、半音差规范化

pub mod key;
