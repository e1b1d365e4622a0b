//! VMLEASE 핵심 에러 타입.
//!
//! 모든 어댑터 crate는 이 타입으로 에러를 반환한다.
//! 배치/쿼터 거부는 문자열 매칭 없이 구분할 수 있도록 전용 enum으로 분리한다.

use thiserror::Error;

/// 배치(placement) 실패 사유
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlacementError {
    /// 클러스터에 온라인 노드가 하나도 없음
    #[error("클러스터 '{cluster}'에 온라인 노드가 없습니다")]
    NoOnlineNodes {
        /// 클러스터 이름
        cluster: String,
    },

    /// 최저 부하 노드도 과부하 임계값 초과
    #[error("클러스터 '{cluster}' 용량 소진: 최저 부하 노드 '{node}' 점수 {score:.2} > 임계값 {threshold:.2}")]
    CapacityExhausted {
        /// 클러스터 이름
        cluster: String,
        /// 최저 부하 노드
        node: String,
        /// 해당 노드 부하 점수
        score: f64,
        /// 과부하 임계값
        threshold: f64,
    },

    /// 모든 온라인 노드의 텔레메트리 조회 실패
    #[error("클러스터 '{cluster}' 노드 텔레메트리를 조회할 수 없습니다")]
    TelemetryUnavailable {
        /// 클러스터 이름
        cluster: String,
    },

    /// 클러스터 동시 세션 상한 도달
    #[error("클러스터 '{cluster}' 동시 세션 상한 도달 ({active}/{max})")]
    ClusterAtCapacity {
        /// 클러스터 이름
        cluster: String,
        /// 현재 활성 세션 수
        active: u32,
        /// 상한
        max: u32,
    },

    /// 요청한 클러스터가 비활성 상태
    #[error("클러스터 '{cluster}'는 비활성 상태입니다")]
    ClusterInactive {
        /// 클러스터 이름
        cluster: String,
    },

    /// 활성 클러스터가 하나도 없음
    #[error("활성 클러스터가 없습니다")]
    NoActiveClusters,

    /// 모든 클러스터 시도 실패
    #[error("모든 클러스터가 과부하 상태입니다 ({tried}개 시도)")]
    AllClustersOverloaded {
        /// 시도한 클러스터 수
        tried: usize,
    },
}

/// 사용자 쿼터 거부 사유
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuotaRejection {
    /// 동시 세션 수 상한 도달
    #[error("동시 세션 수 상한 도달 ({active}/{max})")]
    TooManySessions {
        /// 현재 활성 세션 수
        active: u32,
        /// 상한
        max: u32,
    },

    /// 동시 잔여 시간 합계 상한 초과
    #[error("세션 시간 한도 초과: 사용 중 {current}분 + 요청 {requested}분 > 한도 {max}분")]
    MinutesExceeded {
        /// 현재 잔여 시간 합계 (분)
        current: i64,
        /// 요청 시간 (분)
        requested: i64,
        /// 한도 (분)
        max: i64,
    },
}

/// 코어 레이어 에러.
#[derive(Debug, Error)]
pub enum CoreError {
    /// JSON 직렬화/역직렬화 실패
    #[error("직렬화 에러: {0}")]
    Serialization(#[from] serde_json::Error),

    /// 설정값 오류
    #[error("설정 에러: {0}")]
    Config(String),

    /// 필드 유효성 검증 실패
    #[error("유효성 검증 실패: {field}: {message}")]
    Validation {
        /// 검증 실패한 필드명
        field: String,
        /// 실패 사유
        message: String,
    },

    /// 인증 실패 (토큰 만료, 자격증명 오류 등)
    #[error("인증 에러: {0}")]
    Auth(String),

    /// 세션 소유자가 아님
    #[error("권한 없음: {0}")]
    Forbidden(String),

    /// 리소스를 찾을 수 없음
    #[error("{resource_type} 미발견: {id}")]
    NotFound {
        /// 리소스 종류 (예: "Session", "Template")
        resource_type: String,
        /// 리소스 식별자
        id: String,
    },

    /// 현재 상태에서 허용되지 않는 작업
    #[error("잘못된 세션 상태: {session_id}는 '{status}' 상태입니다 ({action} 불가)")]
    InvalidState {
        /// 세션 ID
        session_id: String,
        /// 현재 상태
        status: String,
        /// 시도한 작업
        action: String,
    },

    /// 내부 에러 (예상치 못한 상황)
    #[error("내부 에러: {0}")]
    Internal(String),

    /// 저장소 에러
    #[error("저장소 에러: {0}")]
    Storage(String),

    /// 네트워크 에러 (연결 실패, 타임아웃)
    #[error("네트워크 에러: {0}")]
    Network(String),

    /// Rate Limit 초과 (429)
    #[error("요청 한도 초과, {retry_after_secs}초 후 재시도")]
    RateLimit {
        /// 재시도 대기 시간 (초)
        retry_after_secs: u64,
    },

    /// 서비스 일시 불가 (503)
    #[error("서비스 일시 불가: {0}")]
    ServiceUnavailable(String),

    /// 게이트웨이 타임아웃 (504)
    #[error("게이트웨이 타임아웃: {0}")]
    GatewayTimeout(String),

    /// 요청 타임아웃 (408)
    #[error("요청 타임아웃: {0}")]
    RequestTimeout(String),

    /// 외부 API의 도메인 거부 (재시도하지 않음)
    #[error("외부 API 거부 ({status}): {message}")]
    Api {
        /// HTTP 상태 코드
        status: u16,
        /// 응답 메시지
        message: String,
    },

    /// 배치 실패 (노드/클러스터 용량)
    #[error("배치 실패: {0}")]
    Placement(#[from] PlacementError),

    /// 쿼터 거부
    #[error("쿼터 거부: {0}")]
    Quota(#[from] QuotaRejection),

    /// 폴링 대기 시간 초과 (호출은 성공했으나 조건이 충족되지 않음)
    #[error("파이프라인 타임아웃: {what} ({waited_secs}초 대기)")]
    PipelineTimeout {
        /// 대기 대상
        what: String,
        /// 대기한 시간 (초)
        waited_secs: u64,
    },

    /// VMID 범위 소진 (영구 실패)
    #[error("VMID 범위 소진: {min}..={max}")]
    VmidExhausted {
        /// 범위 하한
        min: u32,
        /// 범위 상한
        max: u32,
    },

    /// 뷰어 토큰 발급 한도 초과
    #[error("뷰어 토큰 발급 한도 초과: 분당 {limit}회")]
    ViewerRateLimited {
        /// 분당 허용 횟수
        limit: u32,
    },

    /// I/O 에러
    #[error("I/O 에러: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// 일시적 인프라 에러인지 판별 (가장 안쪽 호출에서 재시도 대상)
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CoreError::Network(_)
                | CoreError::RateLimit { .. }
                | CoreError::ServiceUnavailable(_)
                | CoreError::GatewayTimeout(_)
                | CoreError::RequestTimeout(_)
        )
    }

    /// 재시도해도 결과가 바뀌지 않는 영구 실패인지 판별
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            CoreError::VmidExhausted { .. }
                | CoreError::NotFound { .. }
                | CoreError::Validation { .. }
                | CoreError::Config(_)
        )
    }

    /// 리소스 미발견 에러 생성 헬퍼
    pub fn not_found(resource_type: &str, id: impl ToString) -> Self {
        CoreError::NotFound {
            resource_type: resource_type.to_string(),
            id: id.to_string(),
        }
    }

    /// 유효성 검증 에러 생성 헬퍼
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        CoreError::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }
}
