// ==========================================
// 牛奶冷链物流系统 - 地理坐标
// ==========================================
// 职责: 坐标点与大圆距离计算
// 说明: 路线几何交给外部导航服务, 本地只做邻近度/聚类用的距离估算
// ==========================================

use serde::{Deserialize, Serialize};

/// 地球半径 (米)
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// 地理坐标点 (WGS84)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Haversine 大圆距离 (米)
    pub fn distance_m(&self, other: &GeoPoint) -> f64 {
        let phi1 = self.lat.to_radians();
        let phi2 = other.lat.to_radians();
        let d_phi = (other.lat - self.lat).to_radians();
        let d_lambda = (other.lng - self.lng).to_radians();

        let a = (d_phi / 2.0).sin().powi(2)
            + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

        EARTH_RADIUS_M * c
    }

    /// 大圆距离 (公里)
    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        self.distance_m(other) / 1000.0
    }
}
